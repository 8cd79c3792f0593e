fn main() {
    if let Err(err) = trip_reports::run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
