use std::collections::HashMap;

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
use uuid::Uuid;

use crate::{
    codes,
    error::{AppError, AppResult},
    models::{Absence, NewSchool, NewStudent, NewTeacher, School, Student, Teacher, TEXT_MAX_LEN},
    routes::{
        lookup::{
            find_school, lookup_student, lookup_teacher, school_name_of, AbsenceResponse,
            AbsencesResponse, MemberQuery, MemberResponse,
        },
        roster,
    },
    schema::{absences, schools, students, teachers},
    sheets::{Roster, RosterEntry},
    state::AppState,
    utils::json::{check_length, nullable_text, required_text, Patch},
};

#[derive(Deserialize)]
pub struct CreateSchoolRequest {
    pub school_name: String,
    pub link: Option<String>,
}

#[derive(Deserialize)]
pub struct SchoolQuery {
    pub name: String,
}

#[derive(Deserialize)]
pub struct SchoolNameQuery {
    pub school_name: String,
}

#[derive(Deserialize)]
pub struct DeleteSchoolQuery {
    pub name: String,
    #[serde(default)]
    pub teachers: bool,
    #[serde(default)]
    pub students: bool,
    #[serde(default)]
    pub absents: bool,
}

#[derive(Serialize)]
pub struct SchoolResponse {
    pub id: Uuid,
    pub school_name: String,
    pub link: Option<String>,
}

impl From<School> for SchoolResponse {
    fn from(school: School) -> Self {
        Self {
            id: school.id,
            school_name: school.name,
            link: school.spreadsheet_link,
        }
    }
}

#[derive(Serialize)]
pub struct SchoolListResponse {
    pub schools: Vec<SchoolResponse>,
}

#[derive(Deserialize)]
pub struct CreateTeachersRequest {
    pub school_name: String,
    pub teachers: Option<Vec<RosterEntry>>,
}

#[derive(Deserialize)]
pub struct CreateStudentsRequest {
    pub school_name: String,
    pub students: Option<Vec<RosterEntry>>,
}

#[derive(Serialize)]
pub struct TeachersResponse {
    pub teachers: Vec<MemberResponse>,
}

#[derive(Serialize)]
pub struct StudentsResponse {
    pub students: Vec<MemberResponse>,
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = schools)]
struct UpdateSchoolChangeset {
    name: Option<String>,
    spreadsheet_link: Option<Option<String>>,
}

fn is_unique_violation(err: &diesel::result::Error) -> bool {
    matches!(
        err,
        diesel::result::Error::DatabaseError(diesel::result::DatabaseErrorKind::UniqueViolation, _)
    )
}

pub async fn create_school(
    State(state): State<AppState>,
    WithRejection(Json(payload), _): WithRejection<Json<CreateSchoolRequest>, AppError>,
) -> AppResult<(StatusCode, Json<SchoolResponse>)> {
    let name = payload.school_name.trim();
    if name.is_empty() {
        return Err(AppError::bad_request("school_name must not be empty"));
    }
    check_length("school_name", name, TEXT_MAX_LEN).map_err(AppError::bad_request)?;

    let new_school = NewSchool {
        id: Uuid::new_v4(),
        name: name.to_string(),
        spreadsheet_link: payload
            .link
            .map(|link| link.trim().to_string())
            .filter(|link| !link.is_empty()),
    };

    let mut conn = state.db()?;
    let school: School = match diesel::insert_into(schools::table)
        .values(&new_school)
        .get_result(&mut conn)
    {
        Ok(school) => school,
        Err(err) if is_unique_violation(&err) => {
            return Err(AppError::bad_request(format!("school {name} already exists")));
        }
        Err(err) => return Err(AppError::from(err)),
    };

    tracing::info!(school = %school.name, has_link = school.spreadsheet_link.is_some(), "created school");
    Ok((StatusCode::CREATED, Json(school.into())))
}

pub async fn get_school(
    State(state): State<AppState>,
    WithRejection(Query(query), _): WithRejection<Query<SchoolQuery>, AppError>,
) -> AppResult<Json<SchoolResponse>> {
    let mut conn = state.db()?;
    Ok(Json(find_school(&mut conn, &query.name)?.into()))
}

pub async fn list_schools(State(state): State<AppState>) -> AppResult<Json<SchoolListResponse>> {
    let mut conn = state.db()?;
    let rows: Vec<School> = schools::table.order(schools::name.asc()).load(&mut conn)?;
    Ok(Json(SchoolListResponse {
        schools: rows.into_iter().map(SchoolResponse::from).collect(),
    }))
}

pub async fn update_school(
    State(state): State<AppState>,
    WithRejection(Query(query), _): WithRejection<Query<SchoolQuery>, AppError>,
    WithRejection(Json(body), _): WithRejection<Json<Value>, AppError>,
) -> AppResult<Json<SchoolResponse>> {
    let mut conn = state.db()?;
    let existing = find_school(&mut conn, &query.name)?;

    let new_name = required_text(&body, "new_name").map_err(AppError::bad_request)?;
    if let Some(name) = new_name.as_deref() {
        check_length("new_name", name, TEXT_MAX_LEN).map_err(AppError::bad_request)?;
    }
    let new_link = nullable_text(&body, "new_link").map_err(AppError::bad_request)?;

    let changeset = UpdateSchoolChangeset {
        name: new_name.filter(|name| *name != existing.name),
        spreadsheet_link: match new_link {
            Patch::Omitted => None,
            Patch::Null => Some(None),
            Patch::Value(link) => Some(Some(link)),
        },
    };

    if changeset.name.is_none() && changeset.spreadsheet_link.is_none() {
        return Ok(Json(existing.into()));
    }

    let updated: School = match diesel::update(schools::table.find(existing.id))
        .set((&changeset, schools::updated_at.eq(Utc::now().naive_utc())))
        .get_result(&mut conn)
    {
        Ok(updated) => updated,
        Err(err) if is_unique_violation(&err) => {
            return Err(AppError::bad_request("school name already exists"));
        }
        Err(err) => return Err(AppError::from(err)),
    };

    tracing::info!(from = %existing.name, to = %updated.name, "updated school");
    Ok(Json(updated.into()))
}

pub async fn delete_school(
    State(state): State<AppState>,
    WithRejection(Query(query), _): WithRejection<Query<DeleteSchoolQuery>, AppError>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    let school = find_school(&mut conn, &query.name)?;

    conn.transaction::<_, AppError, _>(|conn| {
        let teacher_count: i64 = teachers::table
            .filter(teachers::school_id.eq(school.id))
            .count()
            .get_result(conn)?;
        let student_count: i64 = students::table
            .filter(students::school_id.eq(school.id))
            .count()
            .get_result(conn)?;
        let absence_count: i64 = absences::table
            .inner_join(students::table)
            .filter(students::school_id.eq(school.id))
            .count()
            .get_result(conn)?;

        if teacher_count > 0 && !query.teachers {
            return Err(AppError::bad_request(format!(
                "school {} still has {teacher_count} teachers; pass `teachers=true`",
                school.name
            )));
        }
        if student_count > 0 && !query.students {
            return Err(AppError::bad_request(format!(
                "school {} still has {student_count} students; pass `students=true`",
                school.name
            )));
        }
        if absence_count > 0 && !query.absents {
            return Err(AppError::bad_request(format!(
                "school {} still has {absence_count} absences; pass `absents=true`",
                school.name
            )));
        }

        let school_students = students::table
            .filter(students::school_id.eq(school.id))
            .select(students::id);
        diesel::delete(absences::table.filter(absences::student_id.eq_any(school_students)))
            .execute(conn)?;
        diesel::delete(students::table.filter(students::school_id.eq(school.id))).execute(conn)?;
        diesel::delete(teachers::table.filter(teachers::school_id.eq(school.id))).execute(conn)?;
        diesel::delete(schools::table.find(school.id)).execute(conn)?;

        tracing::info!(
            school = %school.name,
            teachers = teacher_count,
            students = student_count,
            absences = absence_count,
            "deleted school"
        );
        Ok(())
    })?;

    Ok(StatusCode::NO_CONTENT)
}

fn in_code_order<T>(mut rows: Vec<T>, codes: &[String], code_of: impl Fn(&T) -> &str) -> Vec<T> {
    let position: HashMap<&str, usize> = codes
        .iter()
        .enumerate()
        .map(|(idx, code)| (code.as_str(), idx))
        .collect();
    rows.sort_by_key(|row| position.get(code_of(row)).copied().unwrap_or(usize::MAX));
    rows
}

pub async fn create_teachers(
    State(state): State<AppState>,
    WithRejection(Json(payload), _): WithRejection<Json<CreateTeachersRequest>, AppError>,
) -> AppResult<(StatusCode, Json<TeachersResponse>)> {
    let school = {
        let mut conn = state.db()?;
        find_school(&mut conn, &payload.school_name)?
    };

    let source = roster::resolve(&state, &school, Roster::Teachers, payload.teachers).await?;
    if source.entries.is_empty() {
        return Ok((
            StatusCode::CREATED,
            Json(TeachersResponse {
                teachers: Vec::new(),
            }),
        ));
    }

    let mut conn = state.db()?;
    let (inserted, issued) = conn.transaction::<_, AppError, _>(|conn| {
        let issued = codes::issue_codes(conn, source.entries.len())?;
        let rows: Vec<NewTeacher> = source
            .entries
            .iter()
            .zip(&issued)
            .map(|(entry, code)| NewTeacher {
                id: Uuid::new_v4(),
                school_id: school.id,
                name: entry.name.clone(),
                surname: entry.surname.clone(),
                patronymic: entry.patronymic.clone(),
                class_name: entry.class_name.clone(),
                code: code.clone(),
            })
            .collect();
        let inserted: Vec<Teacher> = diesel::insert_into(teachers::table)
            .values(&rows)
            .get_results(conn)?;
        Ok((inserted, issued))
    })?;
    drop(conn);

    tracing::info!(school = %school.name, count = inserted.len(), "created teachers");

    if let Some(link) = source.imported_from.as_deref() {
        roster::write_back_codes(&state, link, Roster::Teachers, &issued).await;
    }

    let teachers = in_code_order(inserted, &issued, |teacher| teacher.code.as_str())
        .into_iter()
        .map(|teacher| MemberResponse::teacher(teacher, school.name.clone()))
        .collect();
    Ok((StatusCode::CREATED, Json(TeachersResponse { teachers })))
}

pub async fn list_teachers(
    State(state): State<AppState>,
    WithRejection(Query(query), _): WithRejection<Query<SchoolNameQuery>, AppError>,
) -> AppResult<Json<TeachersResponse>> {
    let mut conn = state.db()?;
    let school = find_school(&mut conn, &query.school_name)?;
    let rows: Vec<Teacher> = teachers::table
        .filter(teachers::school_id.eq(school.id))
        .order((
            teachers::class_name.asc(),
            teachers::surname.asc(),
            teachers::name.asc(),
        ))
        .load(&mut conn)?;

    Ok(Json(TeachersResponse {
        teachers: rows
            .into_iter()
            .map(|teacher| MemberResponse::teacher(teacher, school.name.clone()))
            .collect(),
    }))
}

pub async fn create_students(
    State(state): State<AppState>,
    WithRejection(Json(payload), _): WithRejection<Json<CreateStudentsRequest>, AppError>,
) -> AppResult<(StatusCode, Json<StudentsResponse>)> {
    let school = {
        let mut conn = state.db()?;
        find_school(&mut conn, &payload.school_name)?
    };

    let source = roster::resolve(&state, &school, Roster::Students, payload.students).await?;
    if source.entries.is_empty() {
        return Ok((
            StatusCode::CREATED,
            Json(StudentsResponse {
                students: Vec::new(),
            }),
        ));
    }

    let mut conn = state.db()?;
    let (inserted, issued) = conn.transaction::<_, AppError, _>(|conn| {
        let issued = codes::issue_codes(conn, source.entries.len())?;
        let rows: Vec<NewStudent> = source
            .entries
            .iter()
            .zip(&issued)
            .map(|(entry, code)| NewStudent {
                id: Uuid::new_v4(),
                school_id: school.id,
                name: entry.name.clone(),
                surname: entry.surname.clone(),
                patronymic: entry.patronymic.clone(),
                class_name: entry.class_name.clone(),
                code: code.clone(),
            })
            .collect();
        let inserted: Vec<Student> = diesel::insert_into(students::table)
            .values(&rows)
            .get_results(conn)?;
        Ok((inserted, issued))
    })?;
    drop(conn);

    tracing::info!(school = %school.name, count = inserted.len(), "created students");

    if let Some(link) = source.imported_from.as_deref() {
        roster::write_back_codes(&state, link, Roster::Students, &issued).await;
    }

    let students = in_code_order(inserted, &issued, |student| student.code.as_str())
        .into_iter()
        .map(|student| MemberResponse::student(student, school.name.clone()))
        .collect();
    Ok((StatusCode::CREATED, Json(StudentsResponse { students })))
}

pub async fn list_students(
    State(state): State<AppState>,
    WithRejection(Query(query), _): WithRejection<Query<SchoolNameQuery>, AppError>,
) -> AppResult<Json<StudentsResponse>> {
    let mut conn = state.db()?;
    let school = find_school(&mut conn, &query.school_name)?;
    let rows: Vec<Student> = students::table
        .filter(students::school_id.eq(school.id))
        .order((
            students::class_name.asc(),
            students::surname.asc(),
            students::name.asc(),
        ))
        .load(&mut conn)?;

    Ok(Json(StudentsResponse {
        students: rows
            .into_iter()
            .map(|student| MemberResponse::student(student, school.name.clone()))
            .collect(),
    }))
}

pub async fn list_absents(
    State(state): State<AppState>,
    WithRejection(Query(query), _): WithRejection<Query<SchoolNameQuery>, AppError>,
) -> AppResult<Json<AbsencesResponse>> {
    let mut conn = state.db()?;
    let school = find_school(&mut conn, &query.school_name)?;
    let rows: Vec<(Absence, Student)> = absences::table
        .inner_join(students::table)
        .filter(students::school_id.eq(school.id))
        .order((
            absences::absent_on.asc(),
            students::class_name.asc(),
            students::surname.asc(),
        ))
        .select((absences::all_columns, students::all_columns))
        .load(&mut conn)?;

    Ok(Json(AbsencesResponse {
        absents: rows
            .iter()
            .map(|(absence, student)| AbsenceResponse::new(absence, student))
            .collect(),
    }))
}

pub async fn find_by_code(
    State(state): State<AppState>,
    WithRejection(Query(query), _): WithRejection<Query<MemberQuery>, AppError>,
) -> AppResult<Json<MemberResponse>> {
    let selector = query.selector()?;
    let mut conn = state.db()?;

    if let Some(teacher) = lookup_teacher(&mut conn, &selector)? {
        let school_name = school_name_of(&mut conn, teacher.school_id)?;
        return Ok(Json(MemberResponse::teacher(teacher, school_name).tagged("teacher")));
    }

    match lookup_student(&mut conn, &selector)? {
        Some(student) => {
            let school_name = school_name_of(&mut conn, student.school_id)?;
            Ok(Json(MemberResponse::student(student, school_name).tagged("student")))
        }
        None => Err(AppError::not_found(format!("nobody holds {selector}"))),
    }
}
