//! Daily refresh loop. Settings are re-read from the local store on every
//! wake, so enabling, disabling or moving the run time takes effect
//! without a restart. The loop talks to the sync engine only through
//! [`sync`].

use std::{thread, time::Duration};

use chrono::{Local, NaiveDate, NaiveDateTime};
use log::{debug, error, info, warn};

use crate::{
    config::RefreshSettings,
    error::EngineResult,
    remote::RemoteSources,
    store::LocalStore,
    sync::{SyncReport, SyncRequest, sync},
};

/// Longest sleep between two reads of the settings.
pub const POLL_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextAction {
    Disabled,
    Wait(Duration),
    RunNow,
}

/// What to do at `now`: run once per calendar day at or after the
/// configured time.
pub fn next_action(
    settings: &RefreshSettings,
    now: NaiveDateTime,
    last_run: Option<NaiveDate>,
) -> NextAction {
    if !settings.enabled {
        return NextAction::Disabled;
    }
    let today = now.date();
    let slot = today.and_time(settings.run_time);
    if last_run.is_some_and(|day| day >= today) {
        let tomorrow = today.succ_opt().unwrap_or(today).and_time(settings.run_time);
        return NextAction::Wait(until(now, tomorrow));
    }
    if now >= slot {
        NextAction::RunNow
    } else {
        NextAction::Wait(until(now, slot))
    }
}

fn until(now: NaiveDateTime, at: NaiveDateTime) -> Duration {
    (at - now).to_std().unwrap_or(Duration::ZERO)
}

#[derive(Debug)]
pub enum StepOutcome {
    Disabled,
    Waiting(Duration),
    Ran(EngineResult<SyncReport>),
}

/// One wake cycle at `now`. A run is recorded for the day whether or not
/// it succeeds; a failure is retried at the next day's slot.
pub fn step(store: &mut LocalStore, sources: &RemoteSources, now: NaiveDateTime) -> EngineResult<StepOutcome> {
    let Some(settings) = store.refresh_settings()? else {
        return Ok(StepOutcome::Disabled);
    };
    let last_run = store.last_refresh_run()?;
    match next_action(&settings, now, last_run) {
        NextAction::Disabled => Ok(StepOutcome::Disabled),
        NextAction::Wait(wait) => Ok(StepOutcome::Waiting(wait)),
        NextAction::RunNow => {
            info!(
                "Starting scheduled refresh with profile '{}'",
                settings.profile
            );
            let request = SyncRequest::new(&settings.profile, settings.chunk_size, settings.min_date);
            let result = sync(store, sources, &request);
            store.record_refresh_run(now.date())?;
            match &result {
                Ok(report) => info!(
                    "Scheduled refresh inserted {} row(s) (trip number {} -> {})",
                    report.inserted, report.from_trip_number, report.through_trip_number
                ),
                Err(err) => error!("Scheduled refresh failed: {err}"),
            }
            Ok(StepOutcome::Ran(result))
        }
    }
}

/// Runs wake cycles until the process stops. Store errors are logged and
/// the loop keeps polling.
pub fn run_forever(store: &mut LocalStore, sources: &RemoteSources) -> ! {
    loop {
        let now = Local::now().naive_local();
        let sleep = match step(store, sources, now) {
            Ok(StepOutcome::Disabled) => {
                debug!("Refresh disabled; checking again later");
                POLL_INTERVAL
            }
            Ok(StepOutcome::Waiting(wait)) => {
                debug!("Next refresh in {}s", wait.as_secs());
                wait.min(POLL_INTERVAL)
            }
            Ok(StepOutcome::Ran(_)) => Duration::from_secs(1),
            Err(err) => {
                warn!("Refresh cycle failed: {err}");
                POLL_INTERVAL
            }
        };
        thread::sleep(sleep);
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveTime;

    use super::*;
    use crate::{
        config::{AppConfig, ConnectionProfile},
        remote::ConnectorRegistry,
    };

    fn at(day: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, day)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn enabled() -> RefreshSettings {
        RefreshSettings {
            enabled: true,
            run_time: NaiveTime::from_hms_opt(2, 0, 0).unwrap(),
            ..RefreshSettings::default()
        }
    }

    #[test]
    fn disabled_settings_never_run() {
        let settings = RefreshSettings::default();
        assert_eq!(next_action(&settings, at(3, 5, 0), None), NextAction::Disabled);
    }

    #[test]
    fn waits_until_slot_then_runs_once_per_day() {
        let settings = enabled();
        assert_eq!(
            next_action(&settings, at(3, 1, 30), None),
            NextAction::Wait(Duration::from_secs(30 * 60))
        );
        assert_eq!(next_action(&settings, at(3, 2, 0), None), NextAction::RunNow);
        assert_eq!(
            next_action(&settings, at(3, 23, 0), Some(NaiveDate::from_ymd_opt(2024, 6, 2).unwrap())),
            NextAction::RunNow
        );
        assert_eq!(
            next_action(&settings, at(3, 23, 0), Some(NaiveDate::from_ymd_opt(2024, 6, 3).unwrap())),
            NextAction::Wait(Duration::from_secs(3 * 3600))
        );
    }

    #[test]
    fn failed_run_is_recorded_and_not_retried_the_same_day() {
        let mut store = LocalStore::open_in_memory().unwrap();
        store.save_refresh_settings(&enabled()).unwrap();
        let config = AppConfig {
            profiles: vec![ConnectionProfile {
                name: "Historie".into(),
                backend: "missing".into(),
                ..ConnectionProfile::default()
            }],
            ..AppConfig::default()
        };
        let sources = RemoteSources::new(config.profiles, ConnectorRegistry::with_builtin());

        let outcome = step(&mut store, &sources, at(4, 3, 0)).unwrap();
        assert!(matches!(outcome, StepOutcome::Ran(Err(ref err)) if err.is_remote()));
        assert_eq!(store.last_refresh_run().unwrap(), NaiveDate::from_ymd_opt(2024, 6, 4));

        let outcome = step(&mut store, &sources, at(4, 4, 0)).unwrap();
        assert!(matches!(outcome, StepOutcome::Waiting(_)));
    }
}
