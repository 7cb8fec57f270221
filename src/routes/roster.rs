use crate::{
    error::{AppError, AppResult},
    models::{School, CLASS_NAME_MAX_LEN, TEXT_MAX_LEN},
    sheets::{Roster, RosterEntry, SheetsError},
    state::AppState,
    utils::json::check_length,
};

pub struct RosterSource {
    pub entries: Vec<RosterEntry>,
    pub imported_from: Option<String>,
}

pub async fn resolve(
    state: &AppState,
    school: &School,
    roster: Roster,
    provided: Option<Vec<RosterEntry>>,
) -> AppResult<RosterSource> {
    if let Some(entries) = provided {
        return Ok(RosterSource {
            entries: normalize(entries)?,
            imported_from: None,
        });
    }

    let link = school
        .spreadsheet_link
        .as_deref()
        .ok_or_else(|| {
            AppError::bad_request(format!(
                "`{}` not provided and school {} has no spreadsheet link",
                roster.label(),
                school.name
            ))
        })?
        .to_string();

    let entries = state.sheets.fetch_roster(&link, roster).await?;
    tracing::info!(
        school = %school.name,
        roster = roster.label(),
        rows = entries.len(),
        "imported roster from spreadsheet"
    );

    Ok(RosterSource {
        entries: normalize(entries)?,
        imported_from: Some(link),
    })
}

pub async fn write_back_codes(state: &AppState, link: &str, roster: Roster, codes: &[String]) {
    if let Err(err) = state.sheets.write_codes(link, roster, codes).await {
        tracing::warn!(
            roster = roster.label(),
            count = codes.len(),
            error = %err,
            "failed to write codes to spreadsheet"
        );
    }
}

pub async fn replace_code(
    state: &AppState,
    link: Option<&str>,
    roster: Roster,
    old_code: &str,
    new_code: &str,
) {
    let Some(link) = link else {
        return;
    };
    match state.sheets.replace_code(link, roster, old_code, new_code).await {
        Ok(()) => {}
        Err(SheetsError::Disabled) => {
            tracing::debug!(roster = roster.label(), "spreadsheet sync disabled, code not mirrored");
        }
        Err(err) => {
            tracing::warn!(
                roster = roster.label(),
                error = %err,
                "failed to replace code in spreadsheet"
            );
        }
    }
}

fn normalize(entries: Vec<RosterEntry>) -> AppResult<Vec<RosterEntry>> {
    entries
        .into_iter()
        .enumerate()
        .map(|(idx, entry)| {
            let name = entry.name.trim().to_string();
            let surname = entry.surname.trim().to_string();
            let class_name = entry.class_name.trim().to_string();
            if name.is_empty() || surname.is_empty() || class_name.is_empty() {
                return Err(AppError::bad_request(format!(
                    "entry {idx}: `name`, `surname` and `class_name` must not be empty"
                )));
            }
            let patronymic = entry
                .patronymic
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty());
            check_length("name", &name, TEXT_MAX_LEN)
                .and_then(|()| check_length("surname", &surname, TEXT_MAX_LEN))
                .and_then(|()| {
                    check_length("patronymic", patronymic.as_deref().unwrap_or(""), TEXT_MAX_LEN)
                })
                .and_then(|()| check_length("class_name", &class_name, CLASS_NAME_MAX_LEN))
                .map_err(|message| AppError::bad_request(format!("entry {idx}: {message}")))?;
            Ok(RosterEntry {
                name,
                surname,
                patronymic,
                class_name,
            })
        })
        .collect()
}
