//! Field catalog for the trip dataset.
//!
//! [`TRIP_COLUMNS`] is the single source of truth for the stored columns:
//! the local table DDL, the remote coercion wrapping and the report field
//! kinds are all derived from each column's [`ColumnClass`]. Derived fields
//! are appended after the stored columns in a fixed order.

use std::{collections::HashMap, sync::OnceLock};

use serde::{Deserialize, Serialize};

use crate::derived::DerivedField;

pub const DEFAULT_DATASET: &str = "rgritten";
pub const TRIP_NUMBER: &str = "ritnummer";
pub const TRIP_DATE: &str = "ritdatum";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Date,
    Time,
    Number,
    Text,
}

impl FieldKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FieldKind::Date => "date",
            FieldKind::Time => "time",
            FieldKind::Number => "number",
            FieldKind::Text => "text",
        }
    }
}

/// How a column is coerced on the remote side and stored locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnClass {
    Text,
    /// Integer-like codes and flags, coerced through a wide decimal.
    Numeric,
    /// Measured quantities (distances, coordinates), coerced through a wide decimal.
    Decimal,
    DateTime,
    Time,
    /// The cursor column, coerced to a wide integer.
    TripNumber,
}

impl ColumnClass {
    pub const fn kind(self) -> FieldKind {
        match self {
            ColumnClass::DateTime => FieldKind::Date,
            ColumnClass::Time => FieldKind::Time,
            ColumnClass::Numeric | ColumnClass::Decimal | ColumnClass::TripNumber => {
                FieldKind::Number
            }
            ColumnClass::Text => FieldKind::Text,
        }
    }

    /// Column type used in the local SQLite table.
    pub const fn local_sql_type(self) -> &'static str {
        match self {
            ColumnClass::Text | ColumnClass::DateTime | ColumnClass::Time => "TEXT",
            ColumnClass::Numeric => "NUMERIC",
            ColumnClass::Decimal => "REAL",
            ColumnClass::TripNumber => "INTEGER",
        }
    }

    /// Columns whose raw remote value must parse as a float.
    pub const fn is_numeric_probe(self) -> bool {
        matches!(self, ColumnClass::Numeric | ColumnClass::Decimal)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub class: ColumnClass,
}

const fn column(name: &'static str, class: ColumnClass) -> Column {
    Column { name, class }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FieldDescriptor {
    pub name: &'static str,
    pub kind: FieldKind,
    pub derived: bool,
}

/// A field name resolved against the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRef {
    Stored(usize),
    Derived(DerivedField),
}

impl FieldRef {
    pub fn kind(self) -> FieldKind {
        match self {
            FieldRef::Stored(index) => TRIP_COLUMNS[index].class.kind(),
            FieldRef::Derived(derived) => derived.kind(),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FieldRef::Stored(index) => TRIP_COLUMNS[index].name,
            FieldRef::Derived(derived) => derived.name(),
        }
    }

    pub fn is_derived(self) -> bool {
        matches!(self, FieldRef::Derived(_))
    }
}

pub fn is_known_dataset(dataset: &str) -> bool {
    dataset == DEFAULT_DATASET
}

/// Addressable fields of `dataset`: stored columns first, derived fields last.
pub fn fields(dataset: &str) -> Vec<FieldDescriptor> {
    if !is_known_dataset(dataset) {
        return Vec::new();
    }
    TRIP_COLUMNS
        .iter()
        .map(|column| FieldDescriptor {
            name: column.name,
            kind: column.class.kind(),
            derived: false,
        })
        .chain(DerivedField::ALL.iter().map(|derived| FieldDescriptor {
            name: derived.name(),
            kind: derived.kind(),
            derived: true,
        }))
        .collect()
}

/// Kind of `field`; unknown fields and datasets report [`FieldKind::Text`].
pub fn kind(dataset: &str, field: &str) -> FieldKind {
    resolve(dataset, field)
        .map(FieldRef::kind)
        .unwrap_or(FieldKind::Text)
}

pub fn resolve(dataset: &str, field: &str) -> Option<FieldRef> {
    if !is_known_dataset(dataset) {
        return None;
    }
    if let Some(index) = column_index(field) {
        return Some(FieldRef::Stored(index));
    }
    DerivedField::from_name(field).map(FieldRef::Derived)
}

pub fn column_index(name: &str) -> Option<usize> {
    static INDEX: OnceLock<HashMap<&'static str, usize>> = OnceLock::new();
    INDEX
        .get_or_init(|| {
            TRIP_COLUMNS
                .iter()
                .enumerate()
                .map(|(idx, column)| (column.name, idx))
                .collect()
        })
        .get(name)
        .copied()
}

pub fn column_by_name(name: &str) -> Option<&'static Column> {
    column_index(name).map(|idx| &TRIP_COLUMNS[idx])
}

pub static TRIP_COLUMNS: &[Column] = &[
    column("rittype", ColumnClass::Text),
    column("ritnummer", ColumnClass::TripNumber),
    column("schema", ColumnClass::Numeric),
    column("status", ColumnClass::Text),
    column("weekdag", ColumnClass::Text),
    column("aankomst", ColumnClass::Text),
    column("vertrek", ColumnClass::Text),
    column("voornaam", ColumnClass::Text),
    column("voorletters", ColumnClass::Text),
    column("voorvoegsels", ColumnClass::Text),
    column("achternaam", ColumnClass::Text),
    column("straat", ColumnClass::Text),
    column("huisnummer", ColumnClass::Text),
    column("postcode", ColumnClass::Text),
    column("woonplaats", ColumnClass::Text),
    column("telefoonnummer", ColumnClass::Text),
    column("faxnummer", ColumnClass::Text),
    column("mobiel", ColumnClass::Text),
    column("emailadres", ColumnClass::Text),
    column("geslacht", ColumnClass::Text),
    column("geboortedatum", ColumnClass::DateTime),
    column("co_bijzonderheden", ColumnClass::Text),
    column("huisnummer_toev", ColumnClass::Text),
    column("land", ColumnClass::Text),
    column("afdeling", ColumnClass::Text),
    column("kamernummer", ColumnClass::Text),
    column("cor_straat", ColumnClass::Text),
    column("cor_huisnummer", ColumnClass::Text),
    column("cor_huisnummer_toev", ColumnClass::Text),
    column("cor_postcode", ColumnClass::Text),
    column("cor_woonplaats", ColumnClass::Text),
    column("cor_land", ColumnClass::Text),
    column("cor_afdeling", ColumnClass::Text),
    column("cor_kamernummer", ColumnClass::Text),
    column("co_klantnummer", ColumnClass::Text),
    column("emailadres2", ColumnClass::Text),
    column("emailadres3", ColumnClass::Text),
    column("klantnummer2", ColumnClass::Text),
    column("tp_id", ColumnClass::Numeric),
    column("tp_byzonderheden", ColumnClass::Text),
    column("pasnummer", ColumnClass::Text),
    column("ind_rolstoel", ColumnClass::Numeric),
    column("rolstoel_type", ColumnClass::Numeric),
    column("ind_begeleiding_sociaal", ColumnClass::Numeric),
    column("ind_begeleiding_medisch", ColumnClass::Numeric),
    column("ind_beperking_lichamelijk", ColumnClass::Numeric),
    column("ind_beperking_verstandelijk", ColumnClass::Numeric),
    column("ind_hulphond", ColumnClass::Numeric),
    column("ind_voorin_in_taxi", ColumnClass::Numeric),
    column("ind_kamer_tot_kamer_vervoer", ColumnClass::Numeric),
    column("ind_gezinstaxi", ColumnClass::Numeric),
    column("ind_personenauto", ColumnClass::Numeric),
    column("ind_lage_instap", ColumnClass::Numeric),
    column("ind_voldoende_beenruimte", ColumnClass::Numeric),
    column("ind_rollator", ColumnClass::Numeric),
    column("ind_beperking_visueel", ColumnClass::Numeric),
    column("ind_beperking_auditief", ColumnClass::Numeric),
    column("ind_autisme", ColumnClass::Numeric),
    column("ind_individueel_vervoer", ColumnClass::Numeric),
    column("beschikkingnummer", ColumnClass::Text),
    column("vervoer_type", ColumnClass::Numeric),
    column("vervoer_type_omschrijving", ColumnClass::Text),
    column("rolstoel_type_omschrijving", ColumnClass::Text),
    column("aantal_gezinstaxi", ColumnClass::Numeric),
    column("aantal_begeleiding_sociaal", ColumnClass::Numeric),
    column("aantal_begeleiding_medisch", ColumnClass::Numeric),
    column("ind_scootmobiel", ColumnClass::Numeric),
    column("ind_strippen", ColumnClass::Numeric),
    column("aantal_strippen", ColumnClass::Numeric),
    column("ind_voldoende_zithoogte", ColumnClass::Numeric),
    column("ind_afwijkend_tarief", ColumnClass::Numeric),
    column("ind_zithulp", ColumnClass::Numeric),
    column("zithulp_type", ColumnClass::Numeric),
    column("financiering_type", ColumnClass::Numeric),
    column("ind_belservice", ColumnClass::Numeric),
    column("ind_epilepsie", ColumnClass::Numeric),
    column("ind_geen_warme_overdracht", ColumnClass::Numeric),
    column("extra_instap_heen", ColumnClass::Numeric),
    column("extra_instap_terug", ColumnClass::Numeric),
    column("extra_uitstap_heen", ColumnClass::Numeric),
    column("extra_uitstap_terug", ColumnClass::Numeric),
    column("ind_kleinschalig", ColumnClass::Numeric),
    column("max_reistijd", ColumnClass::Numeric),
    column("ind_extra1", ColumnClass::Numeric),
    column("ind_extra2", ColumnClass::Numeric),
    column("ind_extra3", ColumnClass::Numeric),
    column("ind_extra4", ColumnClass::Numeric),
    column("ind_extra5", ColumnClass::Numeric),
    column("ind_busbegeleider_nodig", ColumnClass::Numeric),
    column("ind_is_busbegeleider", ColumnClass::Numeric),
    column("ind_inclusief_begeleider", ColumnClass::Numeric),
    column("ind_alleen_begeleider", ColumnClass::Numeric),
    column("ind_invloed_op_factuur", ColumnClass::Numeric),
    column("ind_client_mag_rit_wijzigen", ColumnClass::Numeric),
    column("ind_ontheffing_mondkapje", ColumnClass::Numeric),
    column("ind_ontheffing_gordelplicht", ColumnClass::Numeric),
    column("ind_bus", ColumnClass::Numeric),
    column("ind_mag_vraagafhankelijk", ColumnClass::Numeric),
    column("budget_standaard", ColumnClass::Text),
    column("budget_huidig", ColumnClass::Text),
    column("ind_alleen_zitten", ColumnClass::Numeric),
    column("ind_diabetes", ColumnClass::Numeric),
    column("ind_deur_deur", ColumnClass::Numeric),
    column("ind_anderstalig", ColumnClass::Numeric),
    column("ind_opvouwbare_rolstoel", ColumnClass::Numeric),
    column("ind_kinderstoel", ColumnClass::Numeric),
    column("ind_stoelverhoger", ColumnClass::Numeric),
    column("ind_gordelkapje", ColumnClass::Numeric),
    column("ind_meerpuntsgordel", ColumnClass::Numeric),
    column("ind_maxicosi", ColumnClass::Numeric),
    column("ind_begeleiding_niet_verplicht", ColumnClass::Numeric),
    column("ind_afasie", ColumnClass::Numeric),
    column("ind_vaste_zitplaats", ColumnClass::Numeric),
    column("ind_gordelverlenging", ColumnClass::Numeric),
    column("ind_lifo", ColumnClass::Numeric),
    column("ind_filo", ColumnClass::Numeric),
    column("ind_fifo", ColumnClass::Numeric),
    column("aantal_kleinschalig", ColumnClass::Numeric),
    column("minimaal_scootmobiel_reisafstand", ColumnClass::Numeric),
    column("minimale_reisafstand", ColumnClass::Numeric),
    column("ind_vervroegde_belservice", ColumnClass::Numeric),
    column("ind_opstappunt_verplicht", ColumnClass::Numeric),
    column("ind_bagage", ColumnClass::Numeric),
    column("type_bagage", ColumnClass::Text),
    column("ind_niet_combineren", ColumnClass::Text),
    column("niet_combineren_met", ColumnClass::Text),
    column("locatie_van", ColumnClass::Text),
    column("straat_van", ColumnClass::Text),
    column("huisnummer_van", ColumnClass::Text),
    column("huisnummer_toev_van", ColumnClass::Text),
    column("postcode_van", ColumnClass::Text),
    column("plaats_van", ColumnClass::Text),
    column("locatie_naar", ColumnClass::Text),
    column("straat_naar", ColumnClass::Text),
    column("huisnummer_naar", ColumnClass::Text),
    column("huisnummer_toev_naar", ColumnClass::Text),
    column("postcode_naar", ColumnClass::Text),
    column("plaats_naar", ColumnClass::Text),
    column("weekdag_id", ColumnClass::Numeric),
    column("owner_id", ColumnClass::Numeric),
    column("carrier_id", ColumnClass::Numeric),
    column("vervoerder", ColumnClass::Text),
    column("opdrachtgever", ColumnClass::Text),
    column("effective_date", ColumnClass::DateTime),
    column("ritdatum", ColumnClass::DateTime),
    column("routenummer", ColumnClass::Text),
    column("vervoerder_routenummer", ColumnClass::Text),
    column("instap", ColumnClass::Time),
    column("uitstap", ColumnClass::Time),
    column("afstand", ColumnClass::Decimal),
    column("duur", ColumnClass::Time),
    column("afstand2", ColumnClass::Decimal),
    column("duur2", ColumnClass::Time),
    column("zoneafstand1", ColumnClass::Numeric),
    column("zoneafstand2", ColumnClass::Numeric),
    column("perceel_id", ColumnClass::Numeric),
    column("perceel_omschrijving", ColumnClass::Text),
    column("gemeld_op", ColumnClass::DateTime),
    column("afwezig_van", ColumnClass::DateTime),
    column("afwezig_totmet", ColumnClass::DateTime),
    column("attendance_reason", ColumnClass::Text),
    column("tekst", ColumnClass::Text),
    column("instelling_gemeld_op", ColumnClass::DateTime),
    column("instelling_afwezig_van", ColumnClass::DateTime),
    column("instelling_afwezig_totmet", ColumnClass::DateTime),
    column("instelling_reden", ColumnClass::Text),
    column("instelling_tekst", ColumnClass::Text),
    column("vervangt_plannedtransport_id", ColumnClass::Numeric),
    column("vervangt_datum", ColumnClass::DateTime),
    column("realisatie_route", ColumnClass::Text),
    column("instapgerealiseerd", ColumnClass::Time),
    column("instaplatitude", ColumnClass::Decimal),
    column("instaplongitude", ColumnClass::Decimal),
    column("uitstapgerealiseerd", ColumnClass::Time),
    column("uitstaplatitude", ColumnClass::Decimal),
    column("uitstaplongitude", ColumnClass::Decimal),
    column("loosmeldinggerealiseerd", ColumnClass::Time),
    column("loosmeldinglatitude", ColumnClass::Decimal),
    column("loosmeldinglongitude", ColumnClass::Decimal),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_has_unique_names_and_cursor_columns() {
        let mut seen = std::collections::HashSet::new();
        for column in TRIP_COLUMNS {
            assert!(seen.insert(column.name), "duplicate column {}", column.name);
        }
        assert_eq!(
            column_by_name(TRIP_NUMBER).map(|c| c.class),
            Some(ColumnClass::TripNumber)
        );
        assert_eq!(
            column_by_name(TRIP_DATE).map(|c| c.class),
            Some(ColumnClass::DateTime)
        );
    }

    #[test]
    fn derived_fields_follow_stored_columns() {
        let fields = fields(DEFAULT_DATASET);
        assert_eq!(fields.len(), TRIP_COLUMNS.len() + DerivedField::ALL.len());
        let tail = &fields[TRIP_COLUMNS.len()..];
        assert!(tail.iter().all(|f| f.derived));
        assert_eq!(tail[0].name, "reistijd_calc");
        assert_eq!(tail[1].name, "locatie_calc");
        assert!(fields[..TRIP_COLUMNS.len()].iter().all(|f| !f.derived));
    }

    #[test]
    fn kinds_follow_column_class() {
        assert_eq!(kind(DEFAULT_DATASET, "ritdatum"), FieldKind::Date);
        assert_eq!(kind(DEFAULT_DATASET, "instap"), FieldKind::Time);
        assert_eq!(kind(DEFAULT_DATASET, "afstand"), FieldKind::Number);
        assert_eq!(kind(DEFAULT_DATASET, "status"), FieldKind::Text);
    }

    #[test]
    fn unknown_fields_and_datasets_default_to_text() {
        assert_eq!(kind(DEFAULT_DATASET, "no_such_field"), FieldKind::Text);
        assert_eq!(kind("other", "ritdatum"), FieldKind::Text);
        assert!(fields("other").is_empty());
        assert!(resolve(DEFAULT_DATASET, "no_such_field").is_none());
    }
}
