use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use axum_extra::extract::WithRejection;
use chrono::Utc;
use diesel::prelude::*;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::{
    codes,
    error::{AppError, AppResult},
    models::{Absence, NewAbsence, School, Student, CLASS_NAME_MAX_LEN, TEXT_MAX_LEN},
    routes::{
        lookup::{
            find_student, parse_date, AbsenceResponse, AbsencesResponse, MemberQuery,
            MemberResponse,
        },
        roster,
        teachers::TgAuthRequest,
    },
    schema::{absences, schools, students},
    sheets::{AbsenceRow, Roster, SheetsError},
    state::AppState,
    utils::json::{check_length, nullable_text, required_text, Patch},
};

#[derive(Deserialize)]
pub struct CreateAbsenceRequest {
    pub code: Option<String>,
    pub tg_user_id: Option<i64>,
    pub date: String,
    pub reason: String,
    pub file: Option<String>,
}

#[derive(Deserialize)]
pub struct AbsenceDateQuery {
    pub date: String,
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = students)]
struct UpdateStudentChangeset {
    name: Option<String>,
    surname: Option<String>,
    patronymic: Option<Option<String>>,
    class_name: Option<String>,
}

fn check_member_lengths(changeset: &UpdateStudentChangeset) -> AppResult<()> {
    let text_fields = [
        ("name", changeset.name.as_deref()),
        ("surname", changeset.surname.as_deref()),
        ("patronymic", changeset.patronymic.as_ref().and_then(|value| value.as_deref())),
    ];
    for (field, value) in text_fields {
        if let Some(value) = value {
            check_length(field, value, TEXT_MAX_LEN).map_err(AppError::bad_request)?;
        }
    }
    if let Some(class_name) = changeset.class_name.as_deref() {
        check_length("class_name", class_name, CLASS_NAME_MAX_LEN).map_err(AppError::bad_request)?;
    }
    Ok(())
}

fn school_of(conn: &mut PgConnection, student: &Student) -> AppResult<School> {
    Ok(schools::table.find(student.school_id).first(conn)?)
}

fn decode_proof(file: Option<&str>) -> AppResult<Option<Vec<u8>>> {
    match file.map(str::trim) {
        None | Some("") => Ok(None),
        Some(encoded) => BASE64
            .decode(encoded)
            .map(Some)
            .map_err(|err| AppError::bad_request(format!("invalid base64 in `file`: {err}"))),
    }
}

pub async fn get_student(
    State(state): State<AppState>,
    WithRejection(Query(query), _): WithRejection<Query<MemberQuery>, AppError>,
) -> AppResult<Json<MemberResponse>> {
    let selector = query.selector()?;
    let mut conn = state.db()?;
    let student = find_student(&mut conn, &selector)?;
    let school = school_of(&mut conn, &student)?;
    Ok(Json(MemberResponse::student(student, school.name)))
}

pub async fn update_student(
    State(state): State<AppState>,
    WithRejection(Query(query), _): WithRejection<Query<MemberQuery>, AppError>,
    WithRejection(Json(body), _): WithRejection<Json<Value>, AppError>,
) -> AppResult<Json<MemberResponse>> {
    let selector = query.selector()?;
    let mut conn = state.db()?;
    let existing = find_student(&mut conn, &selector)?;

    let changeset = UpdateStudentChangeset {
        name: required_text(&body, "name").map_err(AppError::bad_request)?,
        surname: required_text(&body, "surname").map_err(AppError::bad_request)?,
        patronymic: match nullable_text(&body, "patronymic").map_err(AppError::bad_request)? {
            Patch::Omitted => None,
            Patch::Null => Some(None),
            Patch::Value(value) => Some(Some(value)),
        },
        class_name: required_text(&body, "class_name").map_err(AppError::bad_request)?,
    };
    check_member_lengths(&changeset)?;

    let updated: Student = diesel::update(students::table.find(existing.id))
        .set((&changeset, students::updated_at.eq(Utc::now().naive_utc())))
        .get_result(&mut conn)?;

    tracing::info!(code = %updated.code, "updated student");
    let school = school_of(&mut conn, &updated)?;
    Ok(Json(MemberResponse::student(updated, school.name)))
}

pub async fn delete_student(
    State(state): State<AppState>,
    WithRejection(Query(query), _): WithRejection<Query<MemberQuery>, AppError>,
) -> AppResult<StatusCode> {
    let selector = query.selector()?;
    let mut conn = state.db()?;
    let student = find_student(&mut conn, &selector)?;

    let removed_absences = conn.transaction::<_, AppError, _>(|conn| {
        let removed = diesel::delete(absences::table.filter(absences::student_id.eq(student.id)))
            .execute(conn)?;
        diesel::delete(students::table.find(student.id)).execute(conn)?;
        Ok(removed)
    })?;

    tracing::info!(code = %student.code, removed_absences, "deleted student");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn tg_auth(
    State(state): State<AppState>,
    WithRejection(Json(payload), _): WithRejection<Json<TgAuthRequest>, AppError>,
) -> AppResult<Json<MemberResponse>> {
    let mut conn = state.db()?;
    let student = students::table
        .filter(students::code.eq(payload.code.trim()))
        .first::<Student>(&mut conn)
        .optional()?
        .ok_or_else(|| AppError::not_found(format!("student with code {} not found", payload.code.trim())))?;

    let bound_elsewhere: Option<Student> = students::table
        .filter(students::tg_user_id.eq(payload.tg_user_id))
        .filter(students::id.ne(student.id))
        .first(&mut conn)
        .optional()?;
    if bound_elsewhere.is_some() {
        return Err(AppError::bad_request(format!(
            "tg_user_id {} is already bound to another student",
            payload.tg_user_id
        )));
    }

    let updated: Student = diesel::update(students::table.find(student.id))
        .set((
            students::tg_user_id.eq(Some(payload.tg_user_id)),
            students::updated_at.eq(Utc::now().naive_utc()),
        ))
        .get_result(&mut conn)?;

    tracing::info!(code = %updated.code, tg_user_id = payload.tg_user_id, "bound student account");
    let school = school_of(&mut conn, &updated)?;
    Ok(Json(MemberResponse::student(updated, school.name)))
}

pub async fn rotate_code(
    State(state): State<AppState>,
    WithRejection(Json(payload), _): WithRejection<Json<MemberQuery>, AppError>,
) -> AppResult<Json<MemberResponse>> {
    let selector = payload.selector()?;
    let mut conn = state.db()?;
    let student = find_student(&mut conn, &selector)?;
    let school = school_of(&mut conn, &student)?;

    let new_code = codes::issue_code(&mut conn)?;
    let updated: Student = diesel::update(students::table.find(student.id))
        .set((
            students::code.eq(&new_code),
            students::updated_at.eq(Utc::now().naive_utc()),
        ))
        .get_result(&mut conn)?;
    drop(conn);

    tracing::info!(student_id = %updated.id, "rotated student code");
    roster::replace_code(
        &state,
        school.spreadsheet_link.as_deref(),
        Roster::Students,
        &student.code,
        &new_code,
    )
    .await;

    Ok(Json(MemberResponse::student(updated, school.name)))
}

pub async fn create_absence(
    State(state): State<AppState>,
    WithRejection(Json(payload), _): WithRejection<Json<CreateAbsenceRequest>, AppError>,
) -> AppResult<(StatusCode, Json<AbsenceResponse>)> {
    let selector = MemberQuery {
        code: payload.code.clone(),
        tg_user_id: payload.tg_user_id,
    }
    .selector()?;
    let absent_on = parse_date(&payload.date)?;
    let reason = payload.reason.trim();
    if reason.is_empty() {
        return Err(AppError::bad_request("reason must not be empty"));
    }
    let proof = decode_proof(payload.file.as_deref())?;

    let mut conn = state.db()?;
    let student = find_student(&mut conn, &selector)?;
    let school = school_of(&mut conn, &student)?;

    let new_absence = NewAbsence {
        id: Uuid::new_v4(),
        student_id: student.id,
        absent_on,
        reason: reason.to_string(),
        proof,
    };

    let absence: Absence = match diesel::insert_into(absences::table)
        .values(&new_absence)
        .get_result(&mut conn)
    {
        Ok(absence) => absence,
        Err(diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::UniqueViolation,
            _,
        )) => {
            return Err(AppError::bad_request(format!(
                "absence on {} is already recorded",
                payload.date.trim()
            )));
        }
        Err(err) => return Err(AppError::from(err)),
    };
    drop(conn);

    tracing::info!(
        code = %student.code,
        date = %absence.absent_on,
        has_proof = absence.proof.is_some(),
        "recorded absence"
    );

    if let Some(link) = school.spreadsheet_link.as_deref() {
        let row = AbsenceRow {
            date: absence.absent_on,
            class_name: student.class_name.clone(),
            surname: student.surname.clone(),
            name: student.name.clone(),
            patronymic: student.patronymic.clone(),
            reason: absence.reason.clone(),
            has_proof: absence.proof.is_some(),
        };
        match state.sheets.append_absence(link, &row).await {
            Ok(()) => {}
            Err(SheetsError::Disabled) => {
                tracing::debug!("spreadsheet sync disabled, absence not mirrored");
            }
            Err(err) => {
                tracing::warn!(school = %school.name, error = %err, "failed to mirror absence");
            }
        }
    }

    Ok((
        StatusCode::CREATED,
        Json(AbsenceResponse::new(&absence, &student)),
    ))
}

pub async fn list_absents(
    State(state): State<AppState>,
    WithRejection(Query(query), _): WithRejection<Query<MemberQuery>, AppError>,
) -> AppResult<Json<AbsencesResponse>> {
    let selector = query.selector()?;
    let mut conn = state.db()?;
    let student = find_student(&mut conn, &selector)?;

    let rows: Vec<Absence> = absences::table
        .filter(absences::student_id.eq(student.id))
        .order(absences::absent_on.asc())
        .load(&mut conn)?;

    Ok(Json(AbsencesResponse {
        absents: rows
            .iter()
            .map(|absence| AbsenceResponse::new(absence, &student))
            .collect(),
    }))
}

pub async fn delete_absence(
    State(state): State<AppState>,
    WithRejection(Query(query), _): WithRejection<Query<MemberQuery>, AppError>,
    WithRejection(Query(date), _): WithRejection<Query<AbsenceDateQuery>, AppError>,
) -> AppResult<StatusCode> {
    let selector = query.selector()?;
    let absent_on = parse_date(&date.date)?;
    let mut conn = state.db()?;
    let student = find_student(&mut conn, &selector)?;

    let deleted = diesel::delete(
        absences::table
            .filter(absences::student_id.eq(student.id))
            .filter(absences::absent_on.eq(absent_on)),
    )
    .execute(&mut conn)?;
    if deleted == 0 {
        return Err(AppError::not_found(format!(
            "no absence on {} for {selector}",
            date.date.trim()
        )));
    }

    tracing::info!(code = %student.code, date = %absent_on, "deleted absence");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_or_blank_file_means_no_proof() {
        assert_eq!(decode_proof(None).unwrap(), None);
        assert_eq!(decode_proof(Some("  ")).unwrap(), None);
    }

    #[test]
    fn decodes_standard_base64() {
        assert_eq!(
            decode_proof(Some("aGVsbG8=")).unwrap(),
            Some(b"hello".to_vec())
        );
    }

    #[test]
    fn invalid_base64_is_a_bad_request() {
        let err = decode_proof(Some("not base64!")).unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
