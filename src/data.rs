use csv::Reader;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};

use crate::analytics::dropout_rate;
use crate::error::DataError;

pub const DROPOUT_STATUS: &str = "Dropout";

/// Number of values pre-selected in each dashboard filter.
const DEFAULT_SELECTION: usize = 3;

/// One student from the processed dataset. Every column except the status is
/// optional so that partially transformed files still load.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StudentRow {
    #[serde(rename = "Course Name", default)]
    pub course: Option<String>,
    #[serde(rename = "Nationality", default)]
    pub nationality: Option<String>,
    #[serde(rename = "Previous Qualification", default)]
    pub previous_qualification: Option<String>,
    #[serde(rename = "Father's Qualification", default)]
    pub father_qualification: Option<String>,
    #[serde(rename = "Mother's Qualification", default)]
    pub mother_qualification: Option<String>,
    #[serde(rename = "Gender (1=Male, 0=Female)", default, deserialize_with = "flag")]
    pub gender: Option<f64>,
    #[serde(rename = "Tuition Fees Up-to-Date", default, deserialize_with = "flag")]
    pub tuition_up_to_date: Option<f64>,
    #[serde(rename = "Scholarship Holder", default, deserialize_with = "flag")]
    pub scholarship_holder: Option<f64>,
    #[serde(rename = "Is Debtor", default, deserialize_with = "flag")]
    pub debtor: Option<f64>,
    #[serde(rename = "Age at Enrollment", default, deserialize_with = "csv::invalid_option")]
    pub age: Option<f64>,
    #[serde(rename = "Average Grade (2nd Sem)", default, deserialize_with = "csv::invalid_option")]
    pub grade_2nd_sem: Option<f64>,
    #[serde(rename = "Unemployment Rate (%)", default, deserialize_with = "csv::invalid_option")]
    pub unemployment_rate: Option<f64>,
    #[serde(rename = "Approved Units (1st Sem)", default, deserialize_with = "csv::invalid_option")]
    pub approved_units_1st_sem: Option<f64>,
    #[serde(rename = "Student Status")]
    pub status: String,
}

impl StudentRow {
    pub fn is_dropout(&self) -> bool {
        self.status == DROPOUT_STATUS
    }
}

/// Maps `Yes`/`Male` to 1 and `No`/`Female` to 0; numeric encodings pass
/// through.
pub fn encode_flag(raw: &str) -> Option<f64> {
    match raw.trim() {
        "Yes" | "Male" => Some(1.0),
        "No" | "Female" => Some(0.0),
        "" => None,
        other => other.parse().ok(),
    }
}

fn flag<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(encode_flag))
}

/// The read-only student table, loaded once at startup.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    rows: Vec<StudentRow>,
    source: Option<PathBuf>,
}

impl Dataset {
    /// Reads `primary`, or `fallback` when `primary` does not exist.
    pub fn load(primary: impl AsRef<Path>, fallback: impl AsRef<Path>) -> Result<Self, DataError> {
        let (primary, fallback) = (primary.as_ref(), fallback.as_ref());

        let (file, path) = match File::open(primary) {
            Ok(file) => (file, primary),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::warn!(primary = %primary.display(), fallback = %fallback.display(), "primary dataset missing, trying fallback");
                match File::open(fallback) {
                    Ok(file) => (file, fallback),
                    Err(e) if e.kind() == ErrorKind::NotFound => {
                        return Err(DataError::NotFound {
                            primary: primary.display().to_string(),
                            fallback: fallback.display().to_string(),
                        })
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            Err(e) => return Err(e.into()),
        };

        let mut dataset = Self::from_reader(file)?;
        dataset.source = Some(path.to_path_buf());
        Ok(dataset)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, DataError> {
        let mut rdr = Reader::from_reader(reader);
        let rows = rdr
            .deserialize()
            .collect::<Result<Vec<StudentRow>, csv::Error>>()?;
        Ok(Self::from_rows(rows))
    }

    pub fn from_rows(rows: Vec<StudentRow>) -> Self {
        Dataset { rows, source: None }
    }

    pub fn rows(&self) -> &[StudentRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// File the rows were read from, if any.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn filter(&self, filter: &DashboardFilter) -> Vec<&StudentRow> {
        self.rows.iter().filter(|row| filter.matches(row)).collect()
    }

    pub fn options(&self) -> FilterOptions {
        FilterOptions {
            courses: FilterChoices::from_values(self.rows.iter().map(|r| r.course.as_deref())),
            nationalities: FilterChoices::from_values(
                self.rows.iter().map(|r| r.nationality.as_deref()),
            ),
            qualifications: FilterChoices::from_values(
                self.rows.iter().map(|r| r.previous_qualification.as_deref()),
            ),
        }
    }
}

/// Distinct values of a categorical column in first-seen order, plus the
/// initial selection.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FilterChoices {
    pub values: Vec<String>,
    pub default: Vec<String>,
}

impl FilterChoices {
    fn from_values<'a>(column: impl Iterator<Item = Option<&'a str>>) -> Self {
        let mut seen = HashSet::new();
        let values: Vec<String> = column
            .flatten()
            .filter(|v| seen.insert(*v))
            .map(str::to_string)
            .collect();
        let default = values.iter().take(DEFAULT_SELECTION).cloned().collect();
        FilterChoices { values, default }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FilterOptions {
    pub courses: FilterChoices,
    pub nationalities: FilterChoices,
    pub qualifications: FilterChoices,
}

impl FilterOptions {
    pub fn default_filter(&self) -> DashboardFilter {
        DashboardFilter {
            courses: Some(self.courses.default.clone()),
            nationalities: Some(self.nationalities.default.clone()),
            qualifications: Some(self.qualifications.default.clone()),
        }
    }
}

/// Dashboard selections. `None` leaves a column unconstrained; `Some` keeps
/// only rows whose value is listed, so an empty list matches nothing.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DashboardFilter {
    #[serde(default)]
    pub courses: Option<Vec<String>>,
    #[serde(default)]
    pub nationalities: Option<Vec<String>>,
    #[serde(default)]
    pub qualifications: Option<Vec<String>>,
}

impl DashboardFilter {
    pub fn courses<I, S>(mut self, courses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.courses = Some(courses.into_iter().map(Into::into).collect());
        self
    }

    pub fn matches(&self, row: &StudentRow) -> bool {
        selected(&self.courses, &row.course)
            && selected(&self.nationalities, &row.nationality)
            && selected(&self.qualifications, &row.previous_qualification)
    }
}

fn selected(choice: &Option<Vec<String>>, value: &Option<String>) -> bool {
    match choice {
        None => true,
        Some(allowed) => value
            .as_ref()
            .is_some_and(|v| allowed.iter().any(|a| a == v)),
    }
}

/// Headline metrics for a filtered table.
#[derive(Debug, Clone, Serialize)]
pub struct Kpis {
    pub total_students: usize,
    pub dropout_rate: f64,
    pub dropout_rate_label: String,
    pub average_grade: Option<f64>,
    pub average_grade_label: Option<String>,
}

impl Kpis {
    pub fn compute(rows: &[&StudentRow]) -> Self {
        let dropout_rate = dropout_rate(rows.iter().copied()) * 100.0;

        let grades: Vec<f64> = rows.iter().filter_map(|r| r.grade_2nd_sem).collect();
        let average_grade =
            (!grades.is_empty()).then(|| grades.iter().sum::<f64>() / grades.len() as f64);

        Kpis {
            total_students: rows.len(),
            dropout_rate,
            dropout_rate_label: format!("{:.1}%", dropout_rate),
            average_grade,
            average_grade_label: average_grade.map(|g| format!("{:.1}", g)),
        }
    }
}
