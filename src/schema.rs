//! Fixed healthcare dataset schema
//!
//! One table, one admission episode per record. Column names are
//! case-sensitive and must be quoted exactly as listed.

/// Name under which the dataset is exposed to SQL.
pub const TABLE_NAME: &str = "df";

/// Approximate size of the shipped dataset, quoted in prompts.
pub const EXPECTED_ROWS: usize = 50_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    Float,
    Text,
    Date,
}

impl ColumnKind {
    /// SQLite column affinity used when materializing the table.
    pub fn sql_type(self) -> &'static str {
        match self {
            ColumnKind::Integer => "INTEGER",
            ColumnKind::Float => "REAL",
            ColumnKind::Text | ColumnKind::Date => "TEXT",
        }
    }

    /// Type label shown to the model.
    pub fn label(self) -> &'static str {
        match self {
            ColumnKind::Integer => "integer",
            ColumnKind::Float => "float",
            ColumnKind::Text => "string",
            ColumnKind::Date => "datetime (text 'YYYY-MM-DD HH:MM:SS')",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub kind: ColumnKind,
    pub description: &'static str,
    /// Stored in mixed case; filters should compare on LOWER(column).
    pub case_insensitive_match: bool,
}

const fn column(
    name: &'static str,
    kind: ColumnKind,
    description: &'static str,
    case_insensitive_match: bool,
) -> ColumnSpec {
    ColumnSpec {
        name,
        kind,
        description,
        case_insensitive_match,
    }
}

pub const COLUMNS: &[ColumnSpec] = &[
    column("Patient_ID", ColumnKind::Integer, "Unique identifier of the patient.", false),
    column("Name", ColumnKind::Text, "Full name of the patient the record belongs to.", true),
    column("Year_of_Birth", ColumnKind::Integer, "Year the patient was born.", false),
    column("Age", ColumnKind::Integer, "Patient age in years at the time of admission.", false),
    column("Gender", ColumnKind::Text, "Patient gender, \"Male\" or \"Female\".", false),
    column("Blood_Type", ColumnKind::Text, "Blood type such as \"A+\" or \"O-\".", false),
    column(
        "Medical_Condition",
        ColumnKind::Text,
        "Primary diagnosis for the admission, e.g. \"Diabetes\", \"Hypertension\", \"Asthma\".",
        false,
    ),
    column("Date_of_Admission", ColumnKind::Date, "Date the patient was admitted.", false),
    column("Doctor", ColumnKind::Text, "Doctor responsible for the patient during the admission.", true),
    column("Hospital", ColumnKind::Text, "Hospital or facility where the patient was admitted.", true),
    column(
        "Insurance_Provider",
        ColumnKind::Text,
        "Insurer: \"Aetna\", \"Blue Cross\", \"Cigna\", \"UnitedHealthcare\" or \"Medicare\".",
        false,
    ),
    column("Billing_Amount", ColumnKind::Float, "Amount billed for the admission.", false),
    column("Room_Number", ColumnKind::Integer, "Room the patient stayed in.", false),
    column(
        "Admission_Type",
        ColumnKind::Text,
        "\"Emergency\", \"Elective\" or \"Urgent\".",
        false,
    ),
    column("Discharge_Date", ColumnKind::Date, "Date the patient was discharged.", false),
    column(
        "Medication",
        ColumnKind::Text,
        "Medication given during the admission, e.g. \"Aspirin\", \"Ibuprofen\", \"Lipitor\".",
        false,
    ),
    column(
        "Test_Results",
        ColumnKind::Text,
        "Outcome of the medical test: \"Normal\", \"Abnormal\" or \"Inconclusive\".",
        false,
    ),
];

pub fn column_spec(name: &str) -> Option<&'static ColumnSpec> {
    COLUMNS.iter().find(|c| c.name == name)
}

/// Columns of the fixed schema missing from `present`.
pub fn missing_columns<'a>(present: impl IntoIterator<Item = &'a str>) -> Vec<&'static str> {
    let present: Vec<&str> = present.into_iter().collect();
    COLUMNS
        .iter()
        .filter(|c| !present.contains(&c.name))
        .map(|c| c.name)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_insensitive_columns() {
        let names: Vec<&str> = COLUMNS
            .iter()
            .filter(|c| c.case_insensitive_match)
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["Name", "Doctor", "Hospital"]);
    }

    #[test]
    fn test_missing_columns() {
        let mut present: Vec<&str> = COLUMNS.iter().map(|c| c.name).collect();
        assert!(missing_columns(present.iter().copied()).is_empty());

        present.retain(|c| *c != "Doctor");
        assert_eq!(missing_columns(present.iter().copied()), vec!["Doctor"]);
    }

    #[test]
    fn test_column_lookup_is_case_sensitive() {
        assert!(column_spec("Billing_Amount").is_some());
        assert!(column_spec("billing_amount").is_none());
    }
}
