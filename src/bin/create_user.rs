use std::env;

use anyhow::{bail, Context, Result};
use diesel::prelude::*;
use uuid::Uuid;

use isabsent::{auth::password, config::AppConfig, db, models::NewUser, schema::users};

const USAGE: &str = "Usage: create_user <login> <email> <password>";

fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let args: Vec<String> = env::args().skip(1).collect();
    let [login, email, password] = args.as_slice() else {
        eprintln!("{USAGE}");
        std::process::exit(1);
    };
    if login.trim().is_empty() || password.is_empty() {
        bail!("login and password must not be empty");
    }

    let config = AppConfig::from_env()?;
    let pool = db::init_pool_with_size(&config.database_url, 1)?;
    db::run_migrations(&pool)?;
    let mut conn = pool.get().context("failed to get database connection")?;

    let new_user = NewUser {
        id: Uuid::new_v4(),
        login: login.trim().to_string(),
        email: email.trim().to_string(),
        password_hash: password::hash_password(password)?,
        info: None,
    };

    diesel::insert_into(users::table)
        .values(&new_user)
        .execute(&mut conn)
        .with_context(|| format!("failed to create user {}", new_user.login))?;

    println!("Created user {}", new_user.login);
    Ok(())
}
