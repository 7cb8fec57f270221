use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use axum_extra::extract::WithRejection;
use chrono::Utc;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    codes,
    error::{AppError, AppResult},
    matching,
    models::{Absence, School, Student, Teacher, CLASS_NAME_MAX_LEN, TEXT_MAX_LEN},
    routes::{
        lookup::{
            find_teacher, parse_date, AbsenceResponse, AbsencesResponse, MemberQuery,
            MemberResponse,
        },
        roster,
    },
    schema::{absences, schools, students, teachers},
    sheets::Roster,
    state::AppState,
    utils::json::{check_length, nullable_text, required_text, Patch},
};

#[derive(Deserialize)]
pub struct TgAuthRequest {
    pub code: String,
    pub tg_user_id: i64,
}

#[derive(Deserialize)]
pub struct NameQuery {
    pub name: String,
}

#[derive(Deserialize)]
pub struct DateQuery {
    pub date: Option<String>,
}

#[derive(Serialize)]
pub struct ClassStudentsResponse {
    pub students: Vec<MemberResponse>,
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = teachers)]
struct UpdateTeacherChangeset {
    name: Option<String>,
    surname: Option<String>,
    patronymic: Option<Option<String>>,
    class_name: Option<String>,
}

fn check_member_lengths(changeset: &UpdateTeacherChangeset) -> AppResult<()> {
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

fn school_of(conn: &mut PgConnection, teacher: &Teacher) -> AppResult<School> {
    Ok(schools::table.find(teacher.school_id).first(conn)?)
}

fn class_students(conn: &mut PgConnection, teacher: &Teacher) -> AppResult<Vec<Student>> {
    Ok(students::table
        .filter(students::school_id.eq(teacher.school_id))
        .filter(students::class_name.eq(&teacher.class_name))
        .order((students::surname.asc(), students::name.asc()))
        .load(conn)?)
}

pub async fn get_teacher(
    State(state): State<AppState>,
    WithRejection(Query(query), _): WithRejection<Query<MemberQuery>, AppError>,
) -> AppResult<Json<MemberResponse>> {
    let selector = query.selector()?;
    let mut conn = state.db()?;
    let teacher = find_teacher(&mut conn, &selector)?;
    let school = school_of(&mut conn, &teacher)?;
    Ok(Json(MemberResponse::teacher(teacher, school.name)))
}

pub async fn update_teacher(
    State(state): State<AppState>,
    WithRejection(Query(query), _): WithRejection<Query<MemberQuery>, AppError>,
    WithRejection(Json(body), _): WithRejection<Json<Value>, AppError>,
) -> AppResult<Json<MemberResponse>> {
    let selector = query.selector()?;
    let mut conn = state.db()?;
    let existing = find_teacher(&mut conn, &selector)?;

    let changeset = UpdateTeacherChangeset {
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

    let updated: Teacher = diesel::update(teachers::table.find(existing.id))
        .set((&changeset, teachers::updated_at.eq(Utc::now().naive_utc())))
        .get_result(&mut conn)?;

    tracing::info!(code = %updated.code, "updated teacher");
    let school = school_of(&mut conn, &updated)?;
    Ok(Json(MemberResponse::teacher(updated, school.name)))
}

pub async fn delete_teacher(
    State(state): State<AppState>,
    WithRejection(Query(query), _): WithRejection<Query<MemberQuery>, AppError>,
) -> AppResult<StatusCode> {
    let selector = query.selector()?;
    let mut conn = state.db()?;
    let teacher = find_teacher(&mut conn, &selector)?;
    diesel::delete(teachers::table.find(teacher.id)).execute(&mut conn)?;

    tracing::info!(code = %teacher.code, "deleted teacher");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn tg_auth(
    State(state): State<AppState>,
    WithRejection(Json(payload), _): WithRejection<Json<TgAuthRequest>, AppError>,
) -> AppResult<Json<MemberResponse>> {
    let mut conn = state.db()?;
    let teacher = teachers::table
        .filter(teachers::code.eq(payload.code.trim()))
        .first::<Teacher>(&mut conn)
        .optional()?
        .ok_or_else(|| AppError::not_found(format!("teacher with code {} not found", payload.code.trim())))?;

    let bound_elsewhere: Option<Teacher> = teachers::table
        .filter(teachers::tg_user_id.eq(payload.tg_user_id))
        .filter(teachers::id.ne(teacher.id))
        .first(&mut conn)
        .optional()?;
    if bound_elsewhere.is_some() {
        return Err(AppError::bad_request(format!(
            "tg_user_id {} is already bound to another teacher",
            payload.tg_user_id
        )));
    }

    let updated: Teacher = diesel::update(teachers::table.find(teacher.id))
        .set((
            teachers::tg_user_id.eq(Some(payload.tg_user_id)),
            teachers::updated_at.eq(Utc::now().naive_utc()),
        ))
        .get_result(&mut conn)?;

    tracing::info!(code = %updated.code, tg_user_id = payload.tg_user_id, "bound teacher account");
    let school = school_of(&mut conn, &updated)?;
    Ok(Json(MemberResponse::teacher(updated, school.name)))
}

pub async fn rotate_code(
    State(state): State<AppState>,
    WithRejection(Json(payload), _): WithRejection<Json<MemberQuery>, AppError>,
) -> AppResult<Json<MemberResponse>> {
    let selector = payload.selector()?;
    let mut conn = state.db()?;
    let teacher = find_teacher(&mut conn, &selector)?;
    let school = school_of(&mut conn, &teacher)?;

    let new_code = codes::issue_code(&mut conn)?;
    let updated: Teacher = diesel::update(teachers::table.find(teacher.id))
        .set((
            teachers::code.eq(&new_code),
            teachers::updated_at.eq(Utc::now().naive_utc()),
        ))
        .get_result(&mut conn)?;
    drop(conn);

    tracing::info!(teacher_id = %updated.id, "rotated teacher code");
    roster::replace_code(
        &state,
        school.spreadsheet_link.as_deref(),
        Roster::Teachers,
        &teacher.code,
        &new_code,
    )
    .await;

    Ok(Json(MemberResponse::teacher(updated, school.name)))
}

pub async fn list_class_students(
    State(state): State<AppState>,
    WithRejection(Query(query), _): WithRejection<Query<MemberQuery>, AppError>,
) -> AppResult<Json<ClassStudentsResponse>> {
    let selector = query.selector()?;
    let mut conn = state.db()?;
    let teacher = find_teacher(&mut conn, &selector)?;
    let school = school_of(&mut conn, &teacher)?;

    let students = class_students(&mut conn, &teacher)?
        .into_iter()
        .map(|student| MemberResponse::student(student, school.name.clone()))
        .collect();
    Ok(Json(ClassStudentsResponse { students }))
}

pub async fn students_by_name(
    State(state): State<AppState>,
    WithRejection(Query(query), _): WithRejection<Query<MemberQuery>, AppError>,
    WithRejection(Query(name), _): WithRejection<Query<NameQuery>, AppError>,
) -> AppResult<Json<ClassStudentsResponse>> {
    let selector = query.selector()?;
    if name.name.trim().is_empty() {
        return Err(AppError::bad_request("name must not be empty"));
    }

    let mut conn = state.db()?;
    let teacher = find_teacher(&mut conn, &selector)?;
    let school = school_of(&mut conn, &teacher)?;

    let candidates: Vec<(String, Student)> = class_students(&mut conn, &teacher)?
        .into_iter()
        .map(|student| (student.full_name(), student))
        .collect();
    let students = matching::rank_by_name(&name.name, &candidates, matching::DEFAULT_LIMIT)
        .into_iter()
        .map(|student| MemberResponse::student(student, school.name.clone()))
        .collect();

    Ok(Json(ClassStudentsResponse { students }))
}

pub async fn list_absents(
    State(state): State<AppState>,
    WithRejection(Query(query), _): WithRejection<Query<MemberQuery>, AppError>,
    WithRejection(Query(filter), _): WithRejection<Query<DateQuery>, AppError>,
) -> AppResult<Json<AbsencesResponse>> {
    let selector = query.selector()?;
    let date = filter.date.as_deref().map(parse_date).transpose()?;

    let mut conn = state.db()?;
    let teacher = find_teacher(&mut conn, &selector)?;

    let mut rows = absences::table
        .inner_join(students::table)
        .filter(students::school_id.eq(teacher.school_id))
        .filter(students::class_name.eq(teacher.class_name.clone()))
        .select((absences::all_columns, students::all_columns))
        .order((absences::absent_on.asc(), students::surname.asc()))
        .into_boxed();
    if let Some(date) = date {
        rows = rows.filter(absences::absent_on.eq(date));
    }
    let rows: Vec<(Absence, Student)> = rows.load(&mut conn)?;

    Ok(Json(AbsencesResponse {
        absents: rows
            .iter()
            .map(|(absence, student)| AbsenceResponse::new(absence, student))
            .collect(),
    }))
}
