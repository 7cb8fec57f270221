use chrono::{NaiveDate, NaiveDateTime};
use diesel::prelude::*;
use uuid::Uuid;

use crate::schema::*;

// VARCHAR widths from the migrations.
pub const LOGIN_MAX_LEN: usize = 100;
pub const TEXT_MAX_LEN: usize = 255;
pub const CLASS_NAME_MAX_LEN: usize = 32;

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: Uuid,
    pub login: String,
    pub email: String,
    pub password_hash: String,
    pub info: Option<String>,
    pub enabled: bool,
    pub token_version: i32,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub id: Uuid,
    pub login: String,
    pub email: String,
    pub password_hash: String,
    pub info: Option<String>,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = schools)]
pub struct School {
    pub id: Uuid,
    pub name: String,
    pub spreadsheet_link: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = schools)]
pub struct NewSchool {
    pub id: Uuid,
    pub name: String,
    pub spreadsheet_link: Option<String>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = teachers)]
#[diesel(belongs_to(School))]
pub struct Teacher {
    pub id: Uuid,
    pub school_id: Uuid,
    pub name: String,
    pub surname: String,
    pub patronymic: Option<String>,
    pub class_name: String,
    pub code: String,
    pub tg_user_id: Option<i64>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = teachers)]
pub struct NewTeacher {
    pub id: Uuid,
    pub school_id: Uuid,
    pub name: String,
    pub surname: String,
    pub patronymic: Option<String>,
    pub class_name: String,
    pub code: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = students)]
#[diesel(belongs_to(School))]
pub struct Student {
    pub id: Uuid,
    pub school_id: Uuid,
    pub name: String,
    pub surname: String,
    pub patronymic: Option<String>,
    pub class_name: String,
    pub code: String,
    pub tg_user_id: Option<i64>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Student {
    pub fn full_name(&self) -> String {
        match self.patronymic.as_deref() {
            Some(patronymic) if !patronymic.is_empty() => {
                format!("{} {} {}", self.surname, self.name, patronymic)
            }
            _ => format!("{} {}", self.surname, self.name),
        }
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = students)]
pub struct NewStudent {
    pub id: Uuid,
    pub school_id: Uuid,
    pub name: String,
    pub surname: String,
    pub patronymic: Option<String>,
    pub class_name: String,
    pub code: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = absences)]
#[diesel(belongs_to(Student))]
pub struct Absence {
    pub id: Uuid,
    pub student_id: Uuid,
    pub absent_on: NaiveDate,
    pub reason: String,
    pub proof: Option<Vec<u8>>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = absences)]
pub struct NewAbsence {
    pub id: Uuid,
    pub student_id: Uuid,
    pub absent_on: NaiveDate,
    pub reason: String,
    pub proof: Option<Vec<u8>>,
}
