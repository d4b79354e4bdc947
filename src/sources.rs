//! The loaded input fields, grouped by sampling frequency, and their mapping
//! from native reanalysis names to canonical names.
use indexmap::IndexMap;
use itertools::Itertools;

use crate::error::AssemblyError;
use crate::field::{Attributes, Field, Frequency};

/// Native ERA5 short names and the canonical names they are resolved under.
pub static DEFAULT_RENAMES: &[(&str, &str)] = &[
    ("t2m", "tas"),
    ("tp", "pr"),
    ("sd", "swe"),
    ("sf", "prsn"),
    ("sp", "ps"),
    ("u10", "uas"),
    ("v10", "vas"),
    ("pev", "evspsblpot"),
    ("msdwswrf", "rsds"),
    ("msdwlwrf", "rlds"),
    ("msnswrf", "rss"),
    ("msnlwrf", "rls"),
    ("d2m", "tdps"),
    ("msl", "psl"),
    ("rsn", "snr"),
    ("i10fg", "wsgsmax"),
];

/// One rename that was applied or refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameEntry {
    pub frequency: Frequency,
    pub from: String,
    pub to: String,
}

/// What [`SourceCollection::rename`] did.
///
/// A rename is skipped when a field already exists under the target name; the
/// existing field wins. Names absent from the collection do not appear at all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenameReport {
    pub renamed: Vec<RenameEntry>,
    pub skipped: Vec<RenameEntry>,
}

impl RenameReport {
    pub fn extend(&mut self, other: RenameReport) {
        self.renamed.extend(other.renamed);
        self.skipped.extend(other.skipped);
    }

    pub fn log(&self) {
        for entry in self.renamed.iter() {
            log::debug!("Renamed {} variable '{}' to '{}'", entry.frequency, entry.from, entry.to);
        }
        for entry in self.skipped.iter() {
            log::warn!(
                "Did not rename {} variable '{}' to '{}': a variable with that name is already present",
                entry.frequency, entry.from, entry.to
            );
        }
    }
}

/// All fields of one sampling frequency, keyed by name.
#[derive(Debug, Clone)]
pub struct SourceCollection {
    frequency: Frequency,
    fields: IndexMap<String, Field>,
}

impl SourceCollection {
    pub fn new(frequency: Frequency) -> Self {
        Self { frequency, fields: IndexMap::new() }
    }

    /// Build a collection from fields, failing if any is at a different frequency
    /// or on different locations than the others.
    pub fn from_fields<I: IntoIterator<Item = Field>>(frequency: Frequency, fields: I) -> Result<Self, AssemblyError> {
        let mut me = Self::new(frequency);
        for field in fields {
            me.insert(field)?;
        }
        Ok(me)
    }

    pub fn frequency(&self) -> Frequency {
        self.frequency
    }

    /// Add a field under its own name, returning any field it replaced.
    pub fn insert(&mut self, field: Field) -> Result<Option<Field>, AssemblyError> {
        if field.frequency() != self.frequency {
            return Err(AssemblyError::FrequencyMismatch {
                variable: field.name().to_string(),
                found: field.frequency().to_string(),
                expected: self.frequency.to_string(),
            });
        }

        if let Some(existing) = self.fields.values().next() {
            if existing.locations() != field.locations() {
                return Err(AssemblyError::location_mismatch(
                    field.name(),
                    existing.name(),
                    field.locations(),
                    existing.locations(),
                ));
            }
        }

        Ok(self.fields.insert(field.name().to_string(), field))
    }

    pub fn get(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(|k| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Locations shared by every field, `None` if the collection is empty.
    pub fn locations(&self) -> Option<&[String]> {
        self.fields.values().next().map(|f| f.locations())
    }

    /// Rename fields from native to canonical names.
    ///
    /// Applying the same map twice is a no-op the second time, since the native
    /// names are gone after the first pass.
    pub fn rename<A: AsRef<str>, B: AsRef<str>>(&mut self, map: &[(A, B)]) -> RenameReport {
        let mut report = RenameReport::default();
        for (from, to) in map.iter() {
            let (from, to) = (from.as_ref(), to.as_ref());
            if from == to || !self.fields.contains_key(from) {
                continue;
            }

            let entry = RenameEntry { frequency: self.frequency, from: from.to_string(), to: to.to_string() };
            if self.fields.contains_key(to) {
                report.skipped.push(entry);
                continue;
            }

            if let Some(field) = self.fields.shift_remove(from) {
                self.fields.insert(to.to_string(), field.renamed(to));
                report.renamed.push(entry);
            }
        }
        report
    }
}

/// The sub-daily and daily inputs of one run.
#[derive(Debug, Clone)]
pub struct SourceSet {
    pub subdaily: SourceCollection,
    pub daily: SourceCollection,
    /// Attributes of the source coordinates (`time`, `lon`, ...), as read
    pub coordinate_attrs: IndexMap<String, Attributes>,
}

impl SourceSet {
    pub fn new(subdaily: SourceCollection, daily: SourceCollection) -> Self {
        Self { subdaily, daily, coordinate_attrs: IndexMap::new() }
    }

    pub fn empty() -> Self {
        Self::new(SourceCollection::new(Frequency::SubDaily), SourceCollection::new(Frequency::Daily))
    }

    pub fn collection(&self, frequency: Frequency) -> &SourceCollection {
        match frequency {
            Frequency::SubDaily => &self.subdaily,
            Frequency::Daily => &self.daily,
        }
    }

    /// Apply [`DEFAULT_RENAMES`] followed by `extra` to both collections.
    pub fn rename_to_canonical<A: AsRef<str>, B: AsRef<str>>(&mut self, extra: &[(A, B)]) -> RenameReport {
        let mut report = self.subdaily.rename(DEFAULT_RENAMES);
        report.extend(self.daily.rename(DEFAULT_RENAMES));
        report.extend(self.subdaily.rename(extra));
        report.extend(self.daily.rename(extra));
        report
    }

    /// Check that both collections cover the same locations.
    pub fn check_locations(&self) -> Result<(), AssemblyError> {
        if let (Some(sub), Some(day)) = (self.subdaily.locations(), self.daily.locations()) {
            if sub != day {
                let sub_name = self.subdaily.names().next().unwrap_or_default();
                let day_name = self.daily.names().next().unwrap_or_default();
                return Err(AssemblyError::location_mismatch(day_name, sub_name, day, sub));
            }
        }
        Ok(())
    }

    pub fn describe(&self) -> String {
        format!(
            "sub-daily: [{}]; daily: [{}]",
            self.subdaily.names().join(", "),
            self.daily.names().join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{daily_times, hourly_times, make_field};

    fn native_subdaily() -> SourceCollection {
        let times = hourly_times(1990, 1, 1, 24);
        SourceCollection::from_fields(
            Frequency::SubDaily,
            ["t2m", "tp", "sp", "tas"].map(|name| make_field(name, Frequency::SubDaily, "K", times.clone(), 2, |_, _| 0.0)),
        )
        .unwrap()
    }

    #[test]
    fn test_rename_reports_collisions() {
        let mut coll = native_subdaily();
        let report = coll.rename(DEFAULT_RENAMES);

        let renamed = report.renamed.iter().map(|e| (e.from.as_str(), e.to.as_str())).collect_vec();
        assert_eq!(renamed, [("tp", "pr"), ("sp", "ps")]);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].from, "t2m");
        assert_eq!(report.skipped[0].to, "tas");

        // The colliding native field is left in place, and renamed fields know their new name
        assert!(coll.contains("t2m"));
        assert_eq!(coll.get("pr").unwrap().name(), "pr");
    }

    #[test]
    fn test_rename_is_idempotent() {
        let mut coll = native_subdaily();
        coll.rename(DEFAULT_RENAMES);
        let names_after_first = coll.names().map(|s| s.to_string()).collect_vec();

        let second = coll.rename(DEFAULT_RENAMES);
        assert!(second.renamed.is_empty());
        assert_eq!(coll.names().map(|s| s.to_string()).collect_vec(), names_after_first);
    }

    #[test]
    fn test_insert_checks_frequency_and_locations() {
        let mut coll = SourceCollection::new(Frequency::Daily);
        let err = coll
            .insert(make_field("tas", Frequency::SubDaily, "K", hourly_times(1990, 1, 1, 2), 2, |_, _| 0.0))
            .unwrap_err();
        assert!(matches!(err, AssemblyError::FrequencyMismatch { .. }));

        coll.insert(make_field("tas", Frequency::Daily, "K", daily_times(1990, 1, 1, 2), 2, |_, _| 0.0))
            .unwrap();
        let err = coll
            .insert(make_field("pr", Frequency::Daily, "K", daily_times(1990, 1, 1, 2), 3, |_, _| 0.0))
            .unwrap_err();
        assert!(matches!(err, AssemblyError::LocationMismatch { .. }));
    }

    #[test]
    fn test_extra_renames() {
        let mut sources = SourceSet::new(native_subdaily(), SourceCollection::new(Frequency::Daily));
        sources.subdaily.rename(&[("tas", "tas_native")]);
        let report = sources.rename_to_canonical(&[("custom", "unused")]);
        assert!(report.skipped.is_empty());
        assert!(sources.subdaily.contains("tas"));
        assert!(sources.subdaily.contains("tas_native"));
    }
}
