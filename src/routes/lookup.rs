use std::fmt;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::NaiveDate;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    error::{AppError, AppResult},
    models::{Absence, School, Student, Teacher},
    schema::{schools, students, teachers},
};

pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Default, Clone, Deserialize)]
pub struct MemberQuery {
    pub code: Option<String>,
    pub tg_user_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberSelector {
    Code(String),
    TgUserId(i64),
}

impl MemberQuery {
    // `code` wins when both keys are present.
    pub fn selector(&self) -> AppResult<MemberSelector> {
        if let Some(code) = self.code.as_deref().map(str::trim) {
            if !code.is_empty() {
                return Ok(MemberSelector::Code(code.to_string()));
            }
        }
        match self.tg_user_id {
            Some(id) => Ok(MemberSelector::TgUserId(id)),
            None => Err(AppError::bad_request(
                "either `code` or `tg_user_id` is required",
            )),
        }
    }
}

impl fmt::Display for MemberSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberSelector::Code(code) => write!(f, "code {code}"),
            MemberSelector::TgUserId(id) => write!(f, "tg_user_id {id}"),
        }
    }
}

pub fn lookup_teacher(
    conn: &mut PgConnection,
    selector: &MemberSelector,
) -> QueryResult<Option<Teacher>> {
    let query = teachers::table.into_boxed();
    let query = match selector {
        MemberSelector::Code(code) => query.filter(teachers::code.eq(code.clone())),
        MemberSelector::TgUserId(id) => query.filter(teachers::tg_user_id.eq(*id)),
    };
    query.first::<Teacher>(conn).optional()
}

pub fn lookup_student(
    conn: &mut PgConnection,
    selector: &MemberSelector,
) -> QueryResult<Option<Student>> {
    let query = students::table.into_boxed();
    let query = match selector {
        MemberSelector::Code(code) => query.filter(students::code.eq(code.clone())),
        MemberSelector::TgUserId(id) => query.filter(students::tg_user_id.eq(*id)),
    };
    query.first::<Student>(conn).optional()
}

pub fn find_teacher(conn: &mut PgConnection, selector: &MemberSelector) -> AppResult<Teacher> {
    lookup_teacher(conn, selector)?
        .ok_or_else(|| AppError::not_found(format!("teacher with {selector} not found")))
}

pub fn find_student(conn: &mut PgConnection, selector: &MemberSelector) -> AppResult<Student> {
    lookup_student(conn, selector)?
        .ok_or_else(|| AppError::not_found(format!("student with {selector} not found")))
}

pub fn find_school(conn: &mut PgConnection, name: &str) -> AppResult<School> {
    schools::table
        .filter(schools::name.eq(name.trim()))
        .first::<School>(conn)
        .optional()?
        .ok_or_else(|| AppError::not_found(format!("school {} not found", name.trim())))
}

pub fn parse_date(value: &str) -> AppResult<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT)
        .map_err(|_| AppError::bad_request(format!("invalid date `{value}`, expected YYYY-MM-DD")))
}

#[derive(Debug, Serialize)]
pub struct MemberResponse {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'static str>,
    pub name: String,
    pub surname: String,
    pub patronymic: Option<String>,
    pub class_name: String,
    pub school_name: String,
    pub code: String,
    pub tg_user_id: Option<i64>,
}

impl MemberResponse {
    pub fn teacher(teacher: Teacher, school_name: String) -> Self {
        Self {
            kind: None,
            name: teacher.name,
            surname: teacher.surname,
            patronymic: teacher.patronymic,
            class_name: teacher.class_name,
            school_name,
            code: teacher.code,
            tg_user_id: teacher.tg_user_id,
        }
    }

    pub fn student(student: Student, school_name: String) -> Self {
        Self {
            kind: None,
            name: student.name,
            surname: student.surname,
            patronymic: student.patronymic,
            class_name: student.class_name,
            school_name,
            code: student.code,
            tg_user_id: student.tg_user_id,
        }
    }

    pub fn tagged(mut self, kind: &'static str) -> Self {
        self.kind = Some(kind);
        self
    }
}

pub fn school_name_of(conn: &mut PgConnection, school_id: uuid::Uuid) -> AppResult<String> {
    Ok(schools::table
        .find(school_id)
        .select(schools::name)
        .first::<String>(conn)?)
}

#[derive(Debug, Serialize)]
pub struct AbsenceResponse {
    pub date: String,
    pub reason: String,
    pub code: String,
    pub tg_user_id: Option<i64>,
    pub name: String,
    pub surname: String,
    pub patronymic: Option<String>,
    pub class_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl AbsenceResponse {
    pub fn new(absence: &Absence, student: &Student) -> Self {
        Self {
            date: absence.absent_on.format(DATE_FORMAT).to_string(),
            reason: absence.reason.clone(),
            code: student.code.clone(),
            tg_user_id: student.tg_user_id,
            name: student.name.clone(),
            surname: student.surname.clone(),
            patronymic: student.patronymic.clone(),
            class_name: student.class_name.clone(),
            file: absence.proof.as_ref().map(|bytes| BASE64.encode(bytes)),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AbsencesResponse {
    pub absents: Vec<AbsenceResponse>,
}
