//! Command implementations.

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::json;
use tracing::warn;

use restcache_core::api::{Pagination, ProgressFn, UploadFile};
use restcache_core::models::{
    CreateUserRequest, LoginRequest, PaginationParams, SortOrder, UpdateUserRequest, User,
};
use restcache_core::{App, Config};

use crate::{Command, UsersCommand};

pub async fn run(command: Command, app: &App, config: &mut Config, json: bool) -> Result<()> {
    match command {
        Command::Login { email } => login(app, config, email, json).await,
        Command::Register { email, name } => register(app, email, name, json).await,
        Command::Logout => {
            app.auth.logout_async().await?;
            println!("Signed out");
            Ok(())
        }
        Command::Whoami => whoami(app, json).await,
        Command::Validate => {
            let valid = app.api.session().has_token() && app.auth.validate_token().await;
            if json {
                print_json(&json!({ "valid": valid }))
            } else {
                println!("{}", if valid { "Session is valid" } else { "Session is not valid" });
                Ok(())
            }
        }
        Command::Refresh => {
            app.auth.refresh_token_async().await?;
            println!("Session token refreshed");
            Ok(())
        }
        Command::Users { action } => users(app, action, json).await,
    }
}

async fn login(app: &App, config: &mut Config, email: Option<String>, json: bool) -> Result<()> {
    let email = match email.or_else(|| config.last_email.clone()) {
        Some(email) => email,
        None => prompt("Email: ")?,
    };
    let password = rpassword::prompt_password("Password: ").context("Failed to read password")?;

    let response = app
        .auth
        .login_async(LoginRequest {
            email: email.clone(),
            password,
        })
        .await?;

    config.last_email = Some(email);
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }

    if json {
        print_json(&response.user)
    } else {
        println!("Signed in as {}", response.user.display_name());
        Ok(())
    }
}

async fn register(app: &App, email: String, name: String, json: bool) -> Result<()> {
    let password = new_password()?;
    let response = app
        .auth
        .register_async(CreateUserRequest {
            email,
            name,
            password,
        })
        .await?;
    if json {
        print_json(&response.user)
    } else {
        println!("Registered and signed in as {}", response.user.display_name());
        Ok(())
    }
}

async fn whoami(app: &App, json: bool) -> Result<()> {
    if !app.api.session().has_token() {
        println!("Not signed in");
        return Ok(());
    }
    let user = app.auth.current_user().await?;
    if json {
        print_json(&user)
    } else {
        print_user(&user);
        Ok(())
    }
}

async fn users(app: &App, action: UsersCommand, json: bool) -> Result<()> {
    match action {
        UsersCommand::List {
            page,
            limit,
            sort_by,
            desc,
        } => {
            let params = PaginationParams {
                page,
                limit,
                sort_order: sort_by
                    .as_ref()
                    .map(|_| if desc { SortOrder::Desc } else { SortOrder::Asc }),
                sort_by,
            };
            let result = app.users.users(Some(params)).await?;
            if json {
                return print_json(&result);
            }
            for user in &result.items {
                println!("{:<24} {:<8} {}", user.id, user.role, user.display_name());
            }
            println!("{}", page_footer(result.pagination.as_ref(), result.items.len()));
            Ok(())
        }
        UsersCommand::Get { id } => match app.users.user(&id).await? {
            Some(user) if json => print_json(&user),
            Some(user) => {
                print_user(&user);
                Ok(())
            }
            None => anyhow::bail!("A user id is required"),
        },
        UsersCommand::Create { email, name } => {
            let password = new_password()?;
            let user = app
                .users
                .create_user_async(CreateUserRequest {
                    email,
                    name,
                    password,
                })
                .await?;
            println!("Created {}", user.id);
            Ok(())
        }
        UsersCommand::Update { id, name, avatar } => {
            if name.is_none() && avatar.is_none() {
                anyhow::bail!("Nothing to update: pass --name or --avatar");
            }
            let user = app
                .users
                .update_user_async(&id, UpdateUserRequest { name, avatar })
                .await?;
            if json {
                print_json(&user)
            } else {
                print_user(&user);
                Ok(())
            }
        }
        UsersCommand::Delete { id } => {
            app.users.delete_user_async(&id).await?;
            println!("Deleted {}", id);
            Ok(())
        }
        UsersCommand::Avatar { id, path } => {
            let file = UploadFile::from_path(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let on_progress: ProgressFn = Arc::new(|percent| {
                eprint!("\rUploading... {:>3}%", percent);
                let _ = std::io::stderr().flush();
            });
            let response = app
                .users
                .upload_avatar_async(&id, file, Some(on_progress))
                .await?;
            eprintln!();
            println!("Avatar set to {}", response.avatar);
            Ok(())
        }
        UsersCommand::Passwd { id } => {
            let current = rpassword::prompt_password("Current password: ")
                .context("Failed to read password")?;
            let new = new_password()?;
            app.users.change_password_async(&id, &current, &new).await?;
            println!("Password changed");
            Ok(())
        }
    }
}

/// Summary line under a user listing. Servers may omit the pagination block.
fn page_footer(pagination: Option<&Pagination>, count: usize) -> String {
    match pagination {
        Some(p) => format!("page {} of {} ({} users)", p.page, p.total_pages, p.total),
        None => format!("{count} users"),
    }
}

fn print_user(user: &User) {
    println!("id:      {}", user.id);
    println!("name:    {}", user.display_name());
    println!("email:   {}", user.email);
    println!("role:    {}", user.role);
    println!("created: {}", user.created_at.format("%Y-%m-%d %H:%M"));
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn new_password() -> Result<String> {
    let password = rpassword::prompt_password("New password: ").context("Failed to read password")?;
    let confirm = rpassword::prompt_password("Repeat password: ").context("Failed to read password")?;
    if password != confirm {
        anyhow::bail!("Passwords do not match");
    }
    Ok(password)
}
