//! Siteforge CLI
//!
//! Administrative front end for a siteforge data directory: tenants, websites,
//! pages, page edits and rendering.
//!
//! Usage:
//! ```bash
//! siteforge tenant create acme --name "Acme Inc"
//! siteforge resolve acme.sites.example.com
//! siteforge website create --tenant acme "Acme Store" --theme sunset
//! siteforge website update --tenant acme <WEBSITE_ID> --domain shop.acme.com
//! siteforge page create --tenant acme --website <WEBSITE_ID> /about --title About
//! siteforge mutate --tenant acme <PAGE_ID> --version 1 \
//!   '{"op":"insert","parent":"root","component":{"type":"heading","props":{"text":"Hi"}}}'
//! siteforge page render --tenant acme <PAGE_ID>
//! ```

mod app;
mod config;
mod logging;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};

use siteforge_core::ident::normalize_page_path;
use siteforge_core::store::Directory;
use siteforge_core::{Mutation, NewWebsite, Page, PageId, WebsiteId};
use siteforge_editor::MutationRequest;

use app::App;
use config::SiteforgeConfig;

/// Siteforge - multi-tenant site builder
#[derive(Parser)]
#[command(name = "siteforge")]
#[command(about = "Siteforge multi-tenant site builder administration", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file (YAML or TOML)
    #[arg(
        short,
        long,
        value_name = "FILE",
        env = "SITEFORGE_CONFIG",
        global = true
    )]
    config: Option<String>,

    /// Data directory (overrides the configuration file)
    #[arg(long, value_name = "DIR", global = true)]
    data_dir: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage tenants
    Tenant {
        #[command(subcommand)]
        command: TenantCommand,
    },
    /// Resolve a host name or subdomain to its tenant id
    Resolve {
        /// Host header value or tenant subdomain
        key: String,
    },
    /// Manage websites of a tenant
    Website {
        #[command(subcommand)]
        command: WebsiteCommand,
    },
    /// Manage pages of a website
    Page {
        #[command(subcommand)]
        command: PageCommand,
    },
    /// Apply a JSON mutation to a page
    Mutate {
        /// Tenant id, subdomain or host
        #[arg(long)]
        tenant: String,

        page: PageId,

        /// Page version the mutation was prepared against
        #[arg(long)]
        version: u64,

        /// Mutation payload, e.g. '{"op":"remove","id":"hero"}'
        mutation: String,
    },
}

#[derive(Subcommand)]
enum TenantCommand {
    /// Register a tenant
    Create {
        subdomain: String,

        /// Display name (defaults to the subdomain)
        #[arg(long)]
        name: Option<String>,
    },
    /// Change a tenant's subdomain
    Rename {
        /// Tenant id, subdomain or host
        tenant: String,
        new_subdomain: String,
    },
    /// List all tenants
    List,
}

#[derive(Subcommand)]
enum WebsiteCommand {
    /// Create a website
    Create {
        #[arg(long)]
        tenant: String,

        name: String,

        #[arg(long, default_value = "default")]
        theme: String,

        /// Custom domain, globally unique
        #[arg(long)]
        domain: Option<String>,
    },
    /// Change a website's attributes
    Update {
        #[arg(long)]
        tenant: String,

        website: WebsiteId,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        theme: Option<String>,

        /// New custom domain, globally unique
        #[arg(long, conflicts_with = "clear_domain")]
        domain: Option<String>,

        /// Drop the custom domain and release its claim
        #[arg(long)]
        clear_domain: bool,

        #[arg(long)]
        published: Option<bool>,
    },
    /// List a tenant's websites
    List {
        #[arg(long)]
        tenant: String,
    },
}

#[derive(Subcommand)]
enum PageCommand {
    /// Create an empty page
    Create {
        #[arg(long)]
        tenant: String,

        #[arg(long)]
        website: WebsiteId,

        path: String,

        #[arg(long)]
        title: Option<String>,

        /// Meta tag as KEY=VALUE, may be repeated
        #[arg(long = "meta", value_name = "KEY=VALUE")]
        meta: Vec<String>,
    },
    /// List pages of a website
    List {
        #[arg(long)]
        tenant: String,

        #[arg(long)]
        website: WebsiteId,
    },
    /// Print a page, including its component tree, as JSON
    Show {
        #[arg(long)]
        tenant: String,

        page: PageId,
    },
    /// Print the rendered HTML document of a page
    Render {
        #[arg(long)]
        tenant: String,

        page: PageId,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => SiteforgeConfig::from_file(path)?,
        None => match SiteforgeConfig::default_path() {
            Some(path) if path.exists() => SiteforgeConfig::from_file(&path.to_string_lossy())?,
            _ => SiteforgeConfig::default(),
        },
    };

    // Merge environment variables (they override config file)
    config.merge_env();

    // CLI flags take highest precedence
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }
    config.validate()?;

    logging::init(&config.logging)?;

    let app = App::init(&config).await?;
    let result = run(&app, cli.command).await;
    app.shutdown().await;
    result
}

async fn run(app: &App, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Tenant { command } => match command {
            TenantCommand::Create { subdomain, name } => {
                let name = name.unwrap_or_else(|| subdomain.clone());
                let tenant = app.directory.create_tenant(&subdomain, &name).await?;
                // Provision the tenant's store up front
                app.registry.acquire(tenant.id).await?;
                info!(tenant_id = %tenant.id, subdomain = %tenant.subdomain, "Created tenant");
                print_json(&tenant)?;
            }
            TenantCommand::Rename {
                tenant,
                new_subdomain,
            } => {
                let tenant = app.rename_tenant(&tenant, &new_subdomain).await?;
                print_json(&tenant)?;
            }
            TenantCommand::List => {
                print_json(&app.directory.list_tenants().await?)?;
            }
        },
        Commands::Resolve { key } => {
            let tenant_id = app.resolver.resolve(&key).await?;
            println!("{}", tenant_id);
        }
        Commands::Website { command } => match command {
            WebsiteCommand::Create {
                tenant,
                name,
                theme,
                domain,
            } => {
                let mut website = NewWebsite::new(name).with_theme(theme);
                if let Some(domain) = domain {
                    website = website.with_domain(domain);
                }
                let website = app.create_website(&tenant, website.into_website()).await?;
                print_json(&website)?;
            }
            WebsiteCommand::Update {
                tenant,
                website,
                name,
                theme,
                domain,
                clear_domain,
                published,
            } => {
                let website = app
                    .update_website(&tenant, website, |w| {
                        if let Some(name) = name {
                            w.name = name;
                        }
                        if let Some(theme) = theme {
                            w.theme = theme;
                        }
                        if domain.is_some() || clear_domain {
                            w.domain = domain;
                        }
                        if let Some(published) = published {
                            w.published = published;
                        }
                    })
                    .await?;
                print_json(&website)?;
            }
            WebsiteCommand::List { tenant } => {
                let store = app.store_for(&tenant).await?;
                print_json(&store.list_websites().await?)?;
            }
        },
        Commands::Page { command } => match command {
            PageCommand::Create {
                tenant,
                website,
                path,
                title,
                meta,
            } => {
                let store = app.store_for(&tenant).await?;
                let path = normalize_page_path(&path)?;
                let title = title.unwrap_or_else(|| path.clone());
                let mut page = Page::new(website, path, title);
                for entry in meta {
                    let Some((key, value)) = entry.split_once('=') else {
                        anyhow::bail!("Invalid meta tag '{}', expected KEY=VALUE", entry);
                    };
                    page = page.with_meta(key.trim(), value.trim());
                }
                print_json(&store.create_page(page).await?)?;
            }
            PageCommand::List { tenant, website } => {
                let store = app.store_for(&tenant).await?;
                print_json(&store.list_pages(website).await?)?;
            }
            PageCommand::Show { tenant, page } => {
                let store = app.store_for(&tenant).await?;
                print_json(&store.get_page(page).await?)?;
            }
            PageCommand::Render { tenant, page } => {
                let store = app.store_for(&tenant).await?;
                let document = app.editor.render(store.as_ref(), page).await?;
                for warning in &document.warnings {
                    warn!(?warning, "Rendered with placeholder");
                }
                print!("{}", document.html);
            }
        },
        Commands::Mutate {
            tenant,
            page,
            version,
            mutation,
        } => {
            let store = app.store_for(&tenant).await?;
            let mutation: Mutation = serde_json::from_str(&mutation)?;
            let request = MutationRequest {
                page_id: page,
                expected_version: version,
                mutation,
            };
            let outcome = app.editor.apply(store.as_ref(), &request).await?;
            print_json(&outcome)?;
        }
    }
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
