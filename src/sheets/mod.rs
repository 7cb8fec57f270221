pub mod google;

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::config::AppConfig;

pub use google::GoogleSheets;

pub const CODE_COLUMN: &str = "E";

pub const ABSENCE_HEADER: [&str; 6] = ["Class", "Surname", "Name", "Patronymic", "Reason", "Proof"];

pub const PROOF_ATTACHED: &str = "attached";

#[derive(Debug, Error)]
pub enum SheetsError {
    #[error("spreadsheet sync is not configured")]
    Disabled,
    #[error("invalid spreadsheet link: {0}")]
    InvalidLink(String),
    #[error("worksheet {0} does not exist")]
    WorksheetMissing(String),
    #[error("spreadsheet roster is empty")]
    EmptyRoster,
    #[error("code {0} not found in spreadsheet")]
    CodeNotFound(String),
    #[error("spreadsheet authentication failed: {0}")]
    Auth(String),
    #[error("spreadsheet request failed with status {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("spreadsheet request failed: {0}")]
    Http(#[from] reqwest::Error),
}

pub type SheetsResult<T> = Result<T, SheetsError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Roster {
    Teachers,
    Students,
}

impl Roster {
    pub fn worksheet_index(self) -> usize {
        match self {
            Roster::Teachers => 0,
            Roster::Students => 1,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Roster::Teachers => "teachers",
            Roster::Students => "students",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub name: String,
    pub surname: String,
    #[serde(default)]
    pub patronymic: Option<String>,
    pub class_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbsenceRow {
    pub date: NaiveDate,
    pub class_name: String,
    pub surname: String,
    pub name: String,
    pub patronymic: Option<String>,
    pub reason: String,
    pub has_proof: bool,
}

impl AbsenceRow {
    pub fn worksheet_title(&self) -> String {
        self.date.format("%Y-%m-%d").to_string()
    }

    pub fn cells(&self) -> Vec<String> {
        vec![
            self.class_name.clone(),
            self.surname.clone(),
            self.name.clone(),
            self.patronymic.clone().unwrap_or_default(),
            self.reason.clone(),
            if self.has_proof {
                PROOF_ATTACHED.to_string()
            } else {
                String::new()
            },
        ]
    }
}

#[async_trait]
pub trait SpreadsheetSync: Send + Sync + 'static {
    async fn fetch_roster(&self, link: &str, roster: Roster) -> SheetsResult<Vec<RosterEntry>>;

    // Writes `codes` into the code column starting at row 2, in roster order.
    async fn write_codes(&self, link: &str, roster: Roster, codes: &[String]) -> SheetsResult<()>;

    async fn replace_code(
        &self,
        link: &str,
        roster: Roster,
        old_code: &str,
        new_code: &str,
    ) -> SheetsResult<()>;

    async fn append_absence(&self, link: &str, row: &AbsenceRow) -> SheetsResult<()>;
}

pub struct DisabledSheets;

#[async_trait]
impl SpreadsheetSync for DisabledSheets {
    async fn fetch_roster(&self, _link: &str, _roster: Roster) -> SheetsResult<Vec<RosterEntry>> {
        Err(SheetsError::Disabled)
    }

    async fn write_codes(&self, _link: &str, _roster: Roster, _codes: &[String]) -> SheetsResult<()> {
        Err(SheetsError::Disabled)
    }

    async fn replace_code(
        &self,
        _link: &str,
        _roster: Roster,
        _old_code: &str,
        _new_code: &str,
    ) -> SheetsResult<()> {
        Err(SheetsError::Disabled)
    }

    async fn append_absence(&self, _link: &str, _row: &AbsenceRow) -> SheetsResult<()> {
        Err(SheetsError::Disabled)
    }
}

pub fn from_config(config: &AppConfig) -> Result<Arc<dyn SpreadsheetSync>> {
    match &config.google_credentials_path {
        Some(path) => {
            let sheets = GoogleSheets::from_credentials_file(path, &config.google_sheets_endpoint)
                .with_context(|| {
                    format!("failed to load google credentials from {}", path.display())
                })?;
            Ok(Arc::new(sheets))
        }
        None => Ok(Arc::new(DisabledSheets)),
    }
}

pub fn spreadsheet_id(link: &str) -> SheetsResult<String> {
    let parsed = Url::parse(link.trim()).map_err(|_| SheetsError::InvalidLink(link.to_string()))?;
    let mut segments = parsed
        .path_segments()
        .ok_or_else(|| SheetsError::InvalidLink(link.to_string()))?;

    while let Some(segment) = segments.next() {
        if segment == "d" {
            return match segments.next() {
                Some(id) if !id.is_empty() => Ok(id.to_string()),
                _ => Err(SheetsError::InvalidLink(link.to_string())),
            };
        }
    }

    Err(SheetsError::InvalidLink(link.to_string()))
}

pub fn column_letters(mut index: usize) -> String {
    let mut letters = Vec::new();
    loop {
        letters.push(b'A' + (index % 26) as u8);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

pub fn a1_address(row: usize, column: usize) -> String {
    format!("{}{}", column_letters(column), row + 1)
}

pub fn code_range(count: usize) -> String {
    format!("{CODE_COLUMN}2:{CODE_COLUMN}{}", count + 1)
}

pub fn quoted_title(title: &str) -> String {
    format!("'{}'", title.replace('\'', "''"))
}

// Parses the worksheet grid of a roster, skipping the header row and rows
// with neither a name nor a surname.
pub fn parse_roster(rows: &[Vec<String>]) -> SheetsResult<Vec<RosterEntry>> {
    if rows.is_empty() {
        return Err(SheetsError::EmptyRoster);
    }

    let cell = |row: &Vec<String>, idx: usize| -> String {
        row.get(idx).map(|value| value.trim().to_string()).unwrap_or_default()
    };

    let entries = rows
        .iter()
        .skip(1)
        .filter_map(|row| {
            let name = cell(row, 2);
            let surname = cell(row, 1);
            if name.is_empty() && surname.is_empty() {
                return None;
            }
            let patronymic = cell(row, 3);
            Some(RosterEntry {
                name,
                surname,
                patronymic: (!patronymic.is_empty()).then_some(patronymic),
                class_name: cell(row, 0),
            })
        })
        .collect();

    Ok(entries)
}

pub fn find_cell(rows: &[Vec<String>], needle: &str) -> Option<(usize, usize)> {
    rows.iter().enumerate().find_map(|(row_idx, row)| {
        row.iter()
            .position(|value| value.trim() == needle)
            .map(|col_idx| (row_idx, col_idx))
    })
}
