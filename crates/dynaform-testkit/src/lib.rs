// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

mod backend;

pub use backend::{Call, FakeBackend};

use anyhow::{Context, Result};
use dynaform_app::{
    ActiveFilter, FieldSchema, FieldType, InitResponse, OptionMap, Record, SelectOption, Value,
};
use std::path::PathBuf;
use time::{Date, Duration, Month};

pub const INVOICE_FORM: &str = "invoice_form";

const CUSTOMERS: [&str; 16] = [
    "Acme", "Globex", "Initech", "Umbrella", "Hooli", "Vandelay", "Stark", "Wayne", "Wonka",
    "Cyberdyne", "Tyrell", "Soylent", "Gringotts", "Monarch", "Aperture", "Oscorp",
];
const CUSTOMER_SUFFIXES: [&str; 5] = ["Corp", "Ltd", "GmbH", "Group", "Industries"];

const CURRENCIES: [(&str, &str); 3] = [("EUR", "Euro"), ("USD", "US Dollar"), ("GBP", "Pound")];

const CITIES: [(&str, &str, &str); 8] = [
    ("ber", "Berlin", "east"),
    ("ham", "Hamburg", "north"),
    ("muc", "Munich", "south"),
    ("cgn", "Cologne", "west"),
    ("fra", "Frankfurt", "west"),
    ("dre", "Dresden", "east"),
    ("kie", "Kiel", "north"),
    ("stu", "Stuttgart", "south"),
];
const REGIONS: [(&str, &str); 4] = [
    ("north", "North"),
    ("east", "East"),
    ("south", "South"),
    ("west", "West"),
];

const NOTES: [&str; 8] = [
    "net 30",
    "partial delivery",
    "paid by transfer",
    "reminder sent",
    "discount applied",
    "credit note pending",
    "recurring",
    "",
];

const REFERENCE_YEAR: i32 = 2026;

#[derive(Debug, Clone)]
struct DeterministicRng {
    state: u64,
}

impl DeterministicRng {
    fn new(seed: u64) -> Self {
        let mut state = seed ^ 0x9E37_79B9_7F4A_7C15;
        if state == 0 {
            state = 0xA409_3822_299F_31D0;
        }
        Self { state }
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self
            .state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);

        let mut x = self.state;
        x ^= x >> 13;
        x ^= x << 7;
        x ^= x >> 17;
        x
    }

    fn int_n(&mut self, n: usize) -> usize {
        if n <= 1 {
            return 0;
        }
        (self.next_u64() % (n as u64)) as usize
    }

    fn bool(&mut self) -> bool {
        (self.next_u64() & 1) == 1
    }
}

/// Deterministic invoice records for the `invoice_form` fixture.
#[derive(Debug, Clone)]
pub struct InvoiceFaker {
    rng: DeterministicRng,
}

impl InvoiceFaker {
    pub fn new(seed: u64) -> Self {
        let normalized = if seed == 0 { 1 } else { seed };
        Self {
            rng: DeterministicRng::new(normalized),
        }
    }

    pub fn int_n(&mut self, n: usize) -> usize {
        self.rng.int_n(n)
    }

    pub fn customer(&mut self) -> String {
        let name = CUSTOMERS[self.rng.int_n(CUSTOMERS.len())];
        let suffix = CUSTOMER_SUFFIXES[self.rng.int_n(CUSTOMER_SUFFIXES.len())];
        format!("{name} {suffix}")
    }

    pub fn invoice(&mut self, id: i64) -> Record {
        let customer = self.customer();
        let (city, _, region) = CITIES[self.rng.int_n(CITIES.len())];
        let (currency, _) = CURRENCIES[self.rng.int_n(CURRENCIES.len())];
        let cents = 1_000 + self.rng.next_u64() % 500_000;
        let amount = cents as f64 / 100.0;
        let paid = self.rng.bool();
        let active = self.rng.int_n(5) != 0;
        let note = NOTES[self.rng.int_n(NOTES.len())];

        Record::new()
            .with("id", id)
            .with("customer", customer)
            .with("city", city)
            .with("region", region)
            .with("currency", currency)
            .with("amount", amount)
            .with("issued", self.issued_date())
            .with("paid", paid)
            .with("note", note)
            .with("active", active)
    }

    /// `count` invoices with ids `1..=count`.
    pub fn invoices(&mut self, count: usize) -> Vec<Record> {
        (1..=count as i64).map(|id| self.invoice(id)).collect()
    }

    fn issued_date(&mut self) -> String {
        let start = Date::from_calendar_date(REFERENCE_YEAR, Month::January, 1)
            .unwrap_or(Date::MIN);
        let day = start + Duration::days(self.rng.int_n(365) as i64);
        format!(
            "{:04}-{:02}-{:02}",
            day.year(),
            u8::from(day.month()),
            day.day()
        )
    }
}

/// Field list of the invoice fixture: one key, three select-backed fields.
pub fn invoice_fields() -> Vec<FieldSchema> {
    let mut note = FieldSchema::new("note", "Note", FieldType::Textarea).with_max_length(200);
    note.show_in_table = false;
    vec![
        FieldSchema::new("id", "Invoice", FieldType::Integer).key(),
        FieldSchema::new("customer", "Customer", FieldType::Text)
            .required()
            .with_max_length(40),
        FieldSchema::new("currency", "Currency", FieldType::Select),
        FieldSchema::new("city", "City", FieldType::Select).with_change_action("city_changed"),
        FieldSchema::new("region", "Region", FieldType::Select),
        FieldSchema::new("amount", "Amount", FieldType::Decimal).with_max_length(12),
        FieldSchema::new("issued", "Issued", FieldType::Date),
        FieldSchema::new("paid", "Paid", FieldType::Logical),
        note,
    ]
}

fn options(pairs: &[(&str, &str)]) -> Vec<SelectOption> {
    pairs
        .iter()
        .map(|(value, label)| SelectOption::new(value, label))
        .collect()
}

pub fn invoice_init(items_per_page: u32) -> InitResponse {
    let mut fixed = OptionMap::new();
    fixed.insert("currency".to_owned(), options(&CURRENCIES));

    let cities: Vec<(&str, &str)> = CITIES.iter().map(|(value, label, _)| (*value, *label)).collect();
    let mut dynamic = OptionMap::new();
    dynamic.insert("city".to_owned(), options(&cities));
    dynamic.insert("region".to_owned(), options(&REGIONS));

    InitResponse {
        fields: invoice_fields(),
        select_options_fix: fixed,
        select_options: dynamic,
        active_filter: Some(ActiveFilter::All),
        has_active_field: true,
        items_per_page: Some(items_per_page),
        table_max_height: Some(Value::text("60vh")),
    }
}

/// Region of a fixture city code, as the `city_changed` action reports it.
pub fn region_for_city(city: &str) -> Option<&'static str> {
    CITIES
        .iter()
        .find(|(code, _, _)| *code == city)
        .map(|(_, _, region)| *region)
}

pub fn temp_config_path() -> Result<(tempfile::TempDir, PathBuf)> {
    let dir = tempfile::tempdir().context("create temp dir")?;
    let path = dir.path().join("config.toml");
    Ok((dir, path))
}

#[cfg(test)]
mod tests {
    use super::{InvoiceFaker, invoice_fields, invoice_init, region_for_city};
    use dynaform_app::{FieldType, FormSchema, Value};
    use std::collections::BTreeSet;

    #[test]
    fn new_deterministic_seed() {
        let mut left = InvoiceFaker::new(42);
        let mut right = InvoiceFaker::new(42);
        assert_eq!(left.invoices(5), right.invoices(5));
    }

    #[test]
    fn invoice_has_every_fixture_field() {
        let mut faker = InvoiceFaker::new(1);
        let invoice = faker.invoice(7);
        for field in invoice_fields() {
            assert!(
                invoice.get(&field.field_name).is_some(),
                "missing {}",
                field.field_name
            );
        }
        assert_eq!(invoice.get("id"), Some(&Value::Integer(7)));
        assert!(invoice.get("active").is_some());
    }

    #[test]
    fn issued_dates_parse_as_dates() {
        let mut faker = InvoiceFaker::new(3);
        for invoice in faker.invoices(20) {
            let issued = invoice.display("issued");
            assert!(
                Value::parse_for_type(FieldType::Date, &issued).is_ok(),
                "bad date {issued}"
            );
        }
    }

    #[test]
    fn init_fixture_builds_a_schema_with_three_selects() -> anyhow::Result<()> {
        let init = invoice_init(50);
        let schema = FormSchema::new("invoice_form", init.fields)?;
        let selects = schema
            .fields()
            .iter()
            .filter(|field| field.field_type == FieldType::Select)
            .count();
        assert_eq!(selects, 3);
        assert_eq!(schema.key_fields().count(), 1);
        Ok(())
    }

    #[test]
    fn variety_across_seeds() {
        let mut names = BTreeSet::new();
        for seed in 0_u64..20_u64 {
            let mut faker = InvoiceFaker::new(seed);
            names.insert(faker.customer());
        }
        assert!(names.len() >= 10, "got {}", names.len());
    }

    #[test]
    fn city_regions_are_known() {
        assert_eq!(region_for_city("ham"), Some("north"));
        assert_eq!(region_for_city("nowhere"), None);
    }

    #[test]
    fn int_n() {
        let mut faker = InvoiceFaker::new(42);
        for _ in 0..100 {
            assert!(faker.int_n(5) < 5);
        }
    }
}
