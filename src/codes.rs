use std::collections::HashSet;

use diesel::{dsl::exists, prelude::*, select, PgConnection, QueryResult};
use rand::{seq::SliceRandom, Rng};

use crate::{
    error::{AppError, AppResult},
    schema::{students, teachers},
};

pub const CODE_LENGTH: usize = 10;

const CODE_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

const MAX_ATTEMPTS_PER_CODE: usize = 64;

pub fn generate_code<R: Rng + ?Sized>(rng: &mut R) -> String {
    CODE_ALPHABET
        .choose_multiple(rng, CODE_LENGTH)
        .map(|byte| *byte as char)
        .collect()
}

pub fn code_in_use(conn: &mut PgConnection, code: &str) -> QueryResult<bool> {
    let teacher_has: bool =
        select(exists(teachers::table.filter(teachers::code.eq(code)))).get_result(conn)?;
    if teacher_has {
        return Ok(true);
    }
    select(exists(students::table.filter(students::code.eq(code)))).get_result(conn)
}

pub fn issue_code(conn: &mut PgConnection) -> AppResult<String> {
    let mut codes = issue_codes(conn, 1)?;
    codes
        .pop()
        .ok_or_else(|| AppError::internal("code issuance produced no code"))
}

pub fn issue_codes(conn: &mut PgConnection, count: usize) -> AppResult<Vec<String>> {
    let mut rng = rand::thread_rng();
    let codes = issue_with(&mut rng, count, |candidate| code_in_use(conn, candidate))?;
    tracing::debug!(count = codes.len(), "issued access codes");
    Ok(codes)
}

fn issue_with<R, F>(rng: &mut R, count: usize, mut is_taken: F) -> AppResult<Vec<String>>
where
    R: Rng + ?Sized,
    F: FnMut(&str) -> QueryResult<bool>,
{
    let mut issued = Vec::with_capacity(count);
    let mut pending: HashSet<String> = HashSet::with_capacity(count);

    for _ in 0..count {
        let mut attempts = 0;
        let code = loop {
            if attempts == MAX_ATTEMPTS_PER_CODE {
                return Err(AppError::internal(format!(
                    "could not find a free code after {MAX_ATTEMPTS_PER_CODE} attempts"
                )));
            }
            attempts += 1;

            let candidate = generate_code(rng);
            if pending.contains(&candidate) || is_taken(&candidate)? {
                continue;
            }
            break candidate;
        };
        pending.insert(code.clone());
        issued.push(code);
    }

    Ok(issued)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn generated_code_has_distinct_alphanumeric_chars() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let code = generate_code(&mut rng);
            assert_eq!(code.len(), CODE_LENGTH);
            assert!(code.chars().all(|c| c.is_ascii_alphanumeric()));
            let distinct: HashSet<char> = code.chars().collect();
            assert_eq!(distinct.len(), CODE_LENGTH);
        }
    }

    #[test]
    fn batch_codes_are_unique_among_themselves() {
        let mut rng = StdRng::seed_from_u64(42);
        let codes = issue_with(&mut rng, 200, |_| Ok(false)).unwrap();
        let distinct: HashSet<&String> = codes.iter().collect();
        assert_eq!(distinct.len(), 200);
    }

    #[test]
    fn taken_codes_are_skipped() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut probe = StdRng::seed_from_u64(1);
        let first_candidate = generate_code(&mut probe);

        let codes = issue_with(&mut rng, 1, |candidate| Ok(candidate == first_candidate)).unwrap();
        assert_eq!(codes.len(), 1);
        assert_ne!(codes[0], first_candidate);
    }

    #[test]
    fn gives_up_when_every_code_is_taken() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut calls = 0;
        let err = issue_with(&mut rng, 1, |_| {
            calls += 1;
            Ok(true)
        })
        .unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(calls, MAX_ATTEMPTS_PER_CODE);
    }

    #[test]
    fn lookup_errors_propagate() {
        let mut rng = StdRng::seed_from_u64(9);
        let err = issue_with(&mut rng, 2, |_| Err(diesel::result::Error::BrokenTransactionManager))
            .unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    }
}
