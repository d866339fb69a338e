//! Identity provider administration CLI.
//!
//! Works directly against the configured credential store, using the same
//! environment variables as the server (`STORAGE_BACKEND`, `DATABASE_URL`,
//! `REDIS_URL`, `PRIVILEGE_CAN_USE_CACHE`). With the cache enabled the tool
//! refuses to run without `REDIS_URL`, since the server would never see writes
//! made to a process-local cache.
//!
//! ```bash
//! idp-admin seed-roles
//! idp-admin create-client --client-id web --role external_client \
//!   --grant password --grant refresh_token --scope "delegated:*" --generate-secret
//! idp-admin create-user --username alice --password "correct horse"
//! idp-admin logout-user --user-id <id>
//! idp-admin set-role-scope --role moderator --scope "delegated:* posts:moderate"
//! ```

use clap::{Args, Parser, Subcommand, ValueEnum};
use idp::{
    cache::create_shared_cache,
    config::Config,
    errors::{RoleError, StorageError},
    oauth::{
        RoleCache, RoleService, SessionGuard,
        types::{
            Client, EXTERNAL_CLIENT_ROLE, GrantType, RoleKind, USER_ROLE, User, generate_id,
            generate_token, parse_scope,
        },
    },
    storage::{CredentialStore, create_storage_backend, parse_storage_backend},
};
use serde::Serialize;
use serde_json::Value;
use std::{process, sync::Arc};

#[derive(Parser)]
#[command(
    name = "idp-admin",
    about = "Identity provider administration tool",
    version = env!("CARGO_PKG_VERSION")
)]
struct Cli {
    /// Output format
    #[arg(long, value_enum, default_value = "json")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Json,
    JsonPretty,
    Table,
}

#[derive(Subcommand)]
enum Commands {
    /// Create any missing system roles
    SeedRoles,
    /// List all roles
    ListRoles,
    /// Replace the scope of a non-system role
    SetRoleScope(SetRoleScopeArgs),
    /// Register a client
    CreateClient(CreateClientArgs),
    /// List registered clients
    ListClients(ListClientsArgs),
    /// Delete a client by its public id
    DeleteClient(DeleteClientArgs),
    /// Create a user account
    CreateUser(CreateUserArgs),
    /// Invalidate every token a user holds
    LogoutUser(LogoutUserArgs),
}

#[derive(Args)]
struct SetRoleScopeArgs {
    #[arg(long)]
    role: String,
    /// Space separated scope entries
    #[arg(long)]
    scope: String,
}

#[derive(Args)]
struct CreateClientArgs {
    #[arg(long)]
    client_id: String,
    #[arg(long)]
    name: Option<String>,
    #[arg(long, default_value = EXTERNAL_CLIENT_ROLE)]
    role: String,
    /// Grant the client may use (repeatable)
    #[arg(long = "grant", required = true)]
    grants: Vec<String>,
    /// Space separated scope ceiling
    #[arg(long, default_value = "")]
    scope: String,
    /// Allowed redirect URI (repeatable)
    #[arg(long = "redirect-uri")]
    redirect_uris: Vec<String>,
    /// Generate a client secret
    #[arg(long)]
    generate_secret: bool,
}

#[derive(Args)]
struct ListClientsArgs {
    #[arg(long)]
    limit: Option<usize>,
}

#[derive(Args)]
struct DeleteClientArgs {
    #[arg(long)]
    client_id: String,
}

#[derive(Args)]
struct CreateUserArgs {
    #[arg(long)]
    username: String,
    #[arg(long)]
    password: String,
    #[arg(long)]
    email: Option<String>,
    #[arg(long, default_value = USER_ROLE)]
    role: String,
    /// Space separated scope; the configured default applies when omitted
    #[arg(long)]
    scope: Option<String>,
}

#[derive(Args)]
struct LogoutUserArgs {
    #[arg(long)]
    user_id: String,
}

/// Application errors
#[derive(Debug, thiserror::Error)]
enum AppError {
    #[error("{0}")]
    Config(#[from] anyhow::Error),
    #[error("{0}")]
    Storage(#[from] StorageError),
    #[error("{0}")]
    Role(#[from] RoleError),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    General(String),
}

struct Context {
    config: Config,
    store: Arc<dyn CredentialStore>,
    roles: RoleService,
    guard: Arc<SessionGuard>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = run(&cli).await;
    match result {
        Ok(()) => process::exit(0),
        Err(err @ AppError::Role(_)) => {
            eprintln!("Error: {}", err);
            process::exit(2);
        }
        Err(err) => {
            eprintln!("Error: {}", err);
            process::exit(1);
        }
    }
}

async fn run(cli: &Cli) -> Result<(), AppError> {
    let ctx = context().await?;

    match &cli.command {
        Commands::SeedRoles => {
            let created = ctx.roles.seed_system_roles().await?;
            output_response(&cli.format, &serde_json::json!({ "created": created }))
        }
        Commands::ListRoles => {
            let roles = ctx.store.list_roles().await?;
            output_response(&cli.format, &roles)
        }
        Commands::SetRoleScope(args) => {
            let role = ctx
                .roles
                .change_scope(&args.role, parse_scope(&args.scope))
                .await?;
            output_response(&cli.format, &role)
        }
        Commands::CreateClient(args) => create_client(&cli.format, &ctx, args).await,
        Commands::ListClients(args) => {
            let clients = ctx.store.list_clients(args.limit).await?;
            output_response(&cli.format, &clients)
        }
        Commands::DeleteClient(args) => {
            ctx.store.delete_client(&args.client_id).await?;
            output_response(&cli.format, &serde_json::json!({ "deleted": args.client_id }))
        }
        Commands::CreateUser(args) => create_user(&cli.format, &ctx, args).await,
        Commands::LogoutUser(args) => {
            let at = ctx.guard.logout_everywhere(&args.user_id).await?;
            output_response(
                &cli.format,
                &serde_json::json!({ "user_id": args.user_id, "logged_out_at": at }),
            )
        }
    }
}

async fn context() -> Result<Context, AppError> {
    let config = Config::new()?;
    let backend = parse_storage_backend(&config.storage_backend, config.database_url.as_deref())?;
    let store = create_storage_backend(backend).await?;

    // Invalidations must land in the cache the server reads from
    let cache = if *config.can_use_cache.as_ref() {
        Some(
            create_shared_cache(config.redis_url.as_deref())
                .await
                .map_err(StorageError::from)?,
        )
    } else {
        None
    };
    let cache_ttl = config
        .token_lifetimes()
        .refresh_token
        .to_std()
        .map_err(|e| AppError::General(e.to_string()))?;

    let guard = Arc::new(SessionGuard::new(store.clone(), cache, cache_ttl));
    let roles = RoleService::new(
        store.clone(),
        Arc::new(RoleCache::new(store.clone())),
        guard.clone(),
    );

    Ok(Context {
        config,
        store,
        roles,
        guard,
    })
}

async fn create_client(
    format: &OutputFormat,
    ctx: &Context,
    args: &CreateClientArgs,
) -> Result<(), AppError> {
    let grants = args
        .grants
        .iter()
        .map(|grant| grant.parse::<GrantType>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| AppError::General(e.to_string()))?;

    match ctx.store.get_role(&args.role).await? {
        Some(role) if role.kind == RoleKind::Client => {}
        Some(_) => {
            return Err(AppError::General(format!(
                "Role {} is not a client role",
                args.role
            )));
        }
        None => return Err(AppError::General(format!("Unknown role {}", args.role))),
    }

    let client = Client {
        id: generate_id(),
        client_id: args.client_id.clone(),
        client_secret: args.generate_secret.then(generate_token),
        name: args.name.clone(),
        role: args.role.clone(),
        scope: parse_scope(&args.scope),
        grants,
        redirect_uris: args.redirect_uris.clone(),
        created_at: chrono::Utc::now(),
    };
    ctx.store.store_client(&client).await?;

    output_response(format, &client)
}

async fn create_user(
    format: &OutputFormat,
    ctx: &Context,
    args: &CreateUserArgs,
) -> Result<(), AppError> {
    if ctx.store.get_user_by_username(&args.username).await?.is_some() {
        return Err(AppError::General(format!(
            "Username {} is taken",
            args.username
        )));
    }

    let password_hash = bcrypt::hash(&args.password, bcrypt::DEFAULT_COST)
        .map_err(|e| AppError::General(format!("Failed to hash password: {}", e)))?;

    let scope = match &args.scope {
        Some(scope) => parse_scope(scope),
        None => ctx.config.default_scope.as_ref().clone(),
    };

    let user = User {
        id: generate_id(),
        username: args.username.clone(),
        email: args.email.clone(),
        password_hash: Some(password_hash),
        role: args.role.clone(),
        scope: Some(scope),
        is_banned: false,
        is_restricted: false,
        global_logout_at: None,
        created_at: chrono::Utc::now(),
    };
    ctx.store.store_user(&user).await?;

    output_response(format, &user)
}

fn output_response<T: Serialize>(format: &OutputFormat, data: &T) -> Result<(), AppError> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string(data)?);
        }
        OutputFormat::JsonPretty => {
            println!("{}", serde_json::to_string_pretty(data)?);
        }
        OutputFormat::Table => {
            let json_value: Value = serde_json::to_value(data)?;
            print_table(&json_value, 0);
        }
    }
    Ok(())
}

/// Print data in table format (recursive for nested values)
fn print_table(value: &Value, indent: usize) {
    let prefix = "  ".repeat(indent);

    match value {
        Value::Object(map) => {
            for (key, val) in map {
                match val {
                    Value::Object(_) | Value::Array(_) => {
                        println!("{}{}:", prefix, key);
                        print_table(val, indent + 1);
                    }
                    _ => println!("{}{}: {}", prefix, key, format_scalar(val)),
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                match item {
                    Value::Object(_) | Value::Array(_) => {
                        println!("{}-", prefix);
                        print_table(item, indent + 1);
                    }
                    _ => println!("{}- {}", prefix, format_scalar(item)),
                }
            }
        }
        other => println!("{}{}", prefix, format_scalar(other)),
    }
}

fn format_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}
