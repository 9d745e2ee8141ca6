use std::io::{self, BufRead, Write};

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use serde_json::Value;
use tracing::warn;

use shopkeep_core::api::{Resource, ResourceKind};
use shopkeep_core::models::ListQuery;
use shopkeep_core::routes::{self, Navigation, Route};
use shopkeep_core::{AuthApi, Config, Gateway, RequestContext};

/// Environment variable supplying the login username
const USERNAME_ENV: &str = "SHOPKEEP_USERNAME";

/// Environment variable supplying the login password, for scripted use
const PASSWORD_ENV: &str = "SHOPKEEP_PASSWORD";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Login {
        username: Option<String>,
        remember_me: Option<bool>,
    },
    Logout,
    Whoami,
    Status,
    List {
        kind: ResourceKind,
        page: u32,
    },
    Get {
        kind: ResourceKind,
        id: u64,
    },
    Open {
        path: String,
    },
}

fn resource(name: Option<&String>) -> Result<ResourceKind> {
    let name = name.ok_or_else(|| anyhow!("missing resource name"))?;
    ResourceKind::from_name(name).ok_or_else(|| anyhow!("unknown resource '{}'", name))
}

impl Command {
    /// Parse command-line arguments (without the program name).
    /// Returns `None` when help was asked for.
    pub fn parse(args: &[String]) -> Result<Option<Self>> {
        let Some((name, rest)) = args.split_first() else {
            return Ok(None);
        };

        let command = match name.as_str() {
            "help" | "--help" | "-h" => return Ok(None),
            "login" => {
                let mut username = None;
                let mut remember_me = None;
                for arg in rest {
                    match arg.as_str() {
                        "--remember" => remember_me = Some(true),
                        "--no-remember" => remember_me = Some(false),
                        flag if flag.starts_with("--") => bail!("unknown option '{}'", flag),
                        value if username.is_none() => username = Some(value.to_string()),
                        value => bail!("unexpected argument '{}'", value),
                    }
                }
                Command::Login { username, remember_me }
            }
            "logout" => Command::Logout,
            "whoami" => Command::Whoami,
            "status" => Command::Status,
            "list" => {
                let kind = resource(rest.first())?;
                let page = match rest.get(1) {
                    Some(page) => page.parse().with_context(|| format!("invalid page '{}'", page))?,
                    None => 1,
                };
                Command::List { kind, page }
            }
            "get" => {
                let kind = resource(rest.first())?;
                let id = rest.get(1).ok_or_else(|| anyhow!("missing record id"))?;
                let id = id.parse().with_context(|| format!("invalid id '{}'", id))?;
                Command::Get { kind, id }
            }
            "open" => {
                let path = rest.first().ok_or_else(|| anyhow!("missing path"))?;
                Command::Open { path: path.clone() }
            }
            other => bail!("unknown command '{}'", other),
        };
        Ok(Some(command))
    }
}

pub async fn execute(command: Command, config: &Config, gateway: &Gateway) -> Result<()> {
    match command {
        Command::Login { username, remember_me } => {
            login(config, gateway, username, remember_me.unwrap_or(config.remember_me_default)).await
        }
        Command::Logout => {
            AuthApi::new(gateway.clone()).logout();
            println!("Logged out");
            Ok(())
        }
        Command::Whoami => {
            let context = RequestContext::from_origin(routes::HOME_PATH);
            let profile = AuthApi::new(gateway.clone()).profile(&context).await?;
            print_json(&serde_json::to_value(profile)?)
        }
        Command::Status => {
            status(gateway);
            Ok(())
        }
        Command::List { kind, page } => {
            let context = RequestContext::from_origin(view_route(kind, None).path());
            let query = ListQuery::page(page);
            let result = Resource::new(gateway.clone(), kind).list(&query, &context).await?;
            eprintln!(
                "{} {} (page {} of {})",
                result.total,
                kind.name(),
                page,
                result.page_count(query.limit).max(1)
            );
            for item in &result.items {
                println!("{}", item);
            }
            Ok(())
        }
        Command::Get { kind, id } => {
            let context = RequestContext::from_origin(view_route(kind, Some(id)).path());
            let record = Resource::new(gateway.clone(), kind).get(id, &context).await?;
            print_json(&record)
        }
        Command::Open { path } => {
            match routes::guard(&path, gateway.store()) {
                Navigation::Allow(route) => println!("open {}", route.path()),
                Navigation::Redirect(location) => println!("redirect {}", location),
            }
            Ok(())
        }
    }
}

/// The app view a resource is shown in, used as the path to resume after a
/// forced logout. Records without a detail view resume at their list.
fn view_route(kind: ResourceKind, id: Option<u64>) -> Route {
    match (kind, id) {
        (ResourceKind::Purchases, Some(id)) => Route::PurchaseDetail(id),
        (ResourceKind::Suppliers, Some(id)) => Route::SupplierDetail(id),
        (ResourceKind::Products, _) => Route::Products,
        (ResourceKind::Inventory | ResourceKind::InventoryTransactions | ResourceKind::InventoryAlerts, _) => {
            Route::Inventory
        }
        (ResourceKind::Members, _) => Route::Members,
        (ResourceKind::Purchases | ResourceKind::PurchaseReceivings, _) => Route::Purchases,
        (ResourceKind::Suppliers, _) => Route::Suppliers,
    }
}

async fn login(config: &Config, gateway: &Gateway, username: Option<String>, remember_me: bool) -> Result<()> {
    let username = match username
        .or_else(|| std::env::var(USERNAME_ENV).ok())
        .or_else(|| config.last_username.clone())
    {
        Some(username) => username,
        None => prompt("Username: ")?,
    };
    if username.is_empty() {
        bail!("username is required");
    }

    let password = match std::env::var(PASSWORD_ENV) {
        Ok(password) => password,
        Err(_) => rpassword::prompt_password("Password: ").context("Failed to read password")?,
    };

    let bundle = AuthApi::new(gateway.clone())
        .login(&username, &password, remember_me)
        .await?;
    println!("Logged in as {}", bundle.user.display_name());

    if config.last_username.as_deref() != Some(username.as_str()) {
        let mut updated = config.clone();
        updated.last_username = Some(username);
        if let Err(e) = updated.save() {
            warn!(error = %e, "Failed to remember username");
        }
    }
    Ok(())
}

fn status(gateway: &Gateway) {
    let Some(bundle) = gateway.store().current() else {
        println!("Not logged in");
        return;
    };

    let now = Utc::now();
    println!("User:        {}", bundle.user.display_name());
    if bundle.is_expired_at(now) {
        println!("Token:       expired at {}", bundle.expires_at.to_rfc3339());
    } else {
        println!(
            "Token:       valid for {} more minutes (until {})",
            bundle.time_until_expiry_at(now).num_minutes(),
            bundle.expires_at.to_rfc3339()
        );
    }
    let refresh = match (&bundle.refresh_token, bundle.refresh_expires_at) {
        (None, _) => "none".to_string(),
        (Some(_), Some(at)) if bundle.refresh_expired_at(now) => format!("expired at {}", at.to_rfc3339()),
        (Some(_), Some(at)) => format!("valid until {}", at.to_rfc3339()),
        (Some(_), None) => "available".to_string(),
    };
    println!("Refresh:     {}", refresh);
    println!("Remember me: {}", if bundle.remember_me { "yes" } else { "no" });
}

fn prompt(label: &str) -> Result<String> {
    let mut stdout = io::stdout();
    write!(stdout, "{}", label)?;
    stdout.flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
