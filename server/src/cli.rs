use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{eyre, WrapErr};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::{
    coral::CoralApi,
    notify::{CoralPresenceSource, LoopConfig, LoopEvent, LoopHandle, NotificationLoop},
    oauth::{session::LoginSession, CachedCredential},
    policy::{PolicyFlags, PolicyStore},
    presence::TransitionEvent,
    routes,
    state::AppState,
};

#[derive(Parser, Debug)]
#[command(name = "nxapi", version, about = "Nintendo Switch Online app API client")]
pub struct Cli {
    /// Nintendo Account id to use instead of the selected user
    #[arg(long = "user", global = true)]
    pub users: Vec<String>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    fn user(&self) -> Option<&str> {
        self.users.first().map(String::as_str)
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Log in to a Nintendo Account
    #[command(subcommand)]
    Auth(AuthCommand),
    /// Manage stored accounts
    #[command(subcommand)]
    Users(UsersCommand),
    Friends,
    Announcements,
    Webservices,
    ActiveEvent,
    /// Show the authenticated Coral user
    User,
    /// Watch friend presence and log changes, one loop per `--user`
    Notify,
    #[command(subcommand)]
    Proxy(ProxyCommand),
}

#[derive(Subcommand, Debug)]
pub enum AuthCommand {
    /// Log in in a browser and paste the redirect URL back
    Login,
    /// Add an account from an existing session token
    Token { session_token: String },
}

#[derive(Subcommand, Debug)]
pub enum UsersCommand {
    Current,
    /// Select the default account
    Use { id: String },
    /// Remove an account's stored tokens
    Logout { id: String },
}

#[derive(Subcommand, Debug)]
pub enum ProxyCommand {
    /// Run the znc proxy server
    Serve {
        #[arg(long)]
        listen: Option<String>,
    },
    /// Issue a proxy token for the current user
    CreateToken(CreateTokenArgs),
    RevokeToken { token: String },
}

#[derive(Args, Debug, Clone)]
pub struct CreateTokenArgs {
    #[arg(long)]
    pub announcements: bool,
    #[arg(long)]
    pub list_friends: bool,
    #[arg(long)]
    pub list_friends_presence: bool,
    #[arg(long)]
    pub friend: bool,
    #[arg(long)]
    pub friend_presence: bool,
    #[arg(long)]
    pub webservices: bool,
    #[arg(long)]
    pub activeevent: bool,
    #[arg(long)]
    pub current_user: bool,
    #[arg(long)]
    pub current_user_presence: bool,
    /// Only allow these friends (nsa id), repeatable
    #[arg(long = "allow-friend")]
    pub allow_friends: Vec<String>,
}

impl From<CreateTokenArgs> for PolicyFlags {
    fn from(args: CreateTokenArgs) -> Self {
        Self {
            announcements: args.announcements,
            list_friends: args.list_friends,
            list_friends_presence: args.list_friends_presence,
            friend: args.friend,
            friend_presence: args.friend_presence,
            webservices: args.webservices,
            activeevent: args.activeevent,
            current_user: args.current_user,
            current_user_presence: args.current_user_presence,
            friends: (!args.allow_friends.is_empty()).then_some(args.allow_friends),
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> color_eyre::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn run(cli: Cli) -> color_eyre::Result<()> {
    let state = AppState::from_env().await?;

    match &cli.command {
        Command::Auth(AuthCommand::Login) => login(&state).await,
        Command::Auth(AuthCommand::Token { session_token }) => {
            add_account(&state, session_token).await
        }
        Command::Users(command) => users(&state, command).await,
        Command::Friends => {
            let coral = coral(&state, cli.user()).await?;
            print_json(&coral.friends().await?)
        }
        Command::Announcements => {
            let coral = coral(&state, cli.user()).await?;
            print_json(&coral.announcements().await?)
        }
        Command::Webservices => {
            let coral = coral(&state, cli.user()).await?;
            print_json(&coral.web_services().await?)
        }
        Command::ActiveEvent => {
            let coral = coral(&state, cli.user()).await?;
            match coral.active_event().await? {
                Some(event) => print_json(&event),
                None => {
                    println!("Not in a voice chat event");
                    Ok(())
                }
            }
        }
        Command::User => {
            let coral = coral(&state, cli.user()).await?;
            print_json(&coral.current_user().await?)
        }
        Command::Notify => notify(&state, &cli.users).await,
        Command::Proxy(command) => proxy(&state, cli.user(), command).await,
    }
}

async fn coral(state: &AppState, user: Option<&str>) -> color_eyre::Result<Arc<dyn CoralApi>> {
    let session_token = state.session_token(user).await?;
    let coral = state.sessions.coral(&session_token).await?;
    Ok(Arc::new(coral))
}

async fn login(state: &AppState) -> color_eyre::Result<()> {
    let session = LoginSession::new(state.clock.now_secs());
    let url = session.authorize_url(
        &state.config.nintendo_account_url,
        &state.config.client_id,
    );

    println!("1. Open this URL and log in:\n\n{}\n", url);
    println!("2. Right click \"Select this person\", copy the link and paste it here:");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let redirect_url = lines
        .next_line()
        .await?
        .ok_or_else(|| eyre!("No redirect URL entered"))?;

    let session_token = state
        .sessions
        .authenticator()
        .exchange_code(&session, redirect_url.trim())
        .await
        .wrap_err("Failed to get a session token")?;

    add_account(state, &session_token).await
}

async fn add_account(state: &AppState, session_token: &str) -> color_eyre::Result<()> {
    let credential = state
        .sessions
        .authenticator()
        .exchange(session_token)
        .await
        .wrap_err("Failed to authenticate")?;

    state.cache.set_selected_user(&credential.user_id).await?;
    print_account(&credential);
    Ok(())
}

fn print_account(credential: &CachedCredential) {
    println!(
        "Authenticated as Nintendo Account {} ({}), NSO account {} ({})",
        credential.user.nickname,
        credential.user_id,
        credential.nso_account.name,
        credential.nso_account.nsa_id
    );
}

async fn users(state: &AppState, command: &UsersCommand) -> color_eyre::Result<()> {
    match command {
        UsersCommand::Current => {
            let Some(user) = state.cache.selected_user().await? else {
                println!("No user selected");
                return Ok(());
            };

            let session_token = state.session_token(Some(&user)).await?;
            match state.cache.get(&session_token).await? {
                Some(credential) => print_account(&credential),
                None => println!("{} (not authenticated yet)", user),
            }
            Ok(())
        }
        UsersCommand::Use { id } => {
            if state.cache.session_token_for_user(id).await?.is_none() {
                return Err(eyre!("Unknown user {}. Run `nxapi auth login` first.", id));
            }
            state.cache.set_selected_user(id).await?;
            info!(user_id = %id, "Selected user");
            Ok(())
        }
        UsersCommand::Logout { id } => {
            state.cache.logout(id).await?;
            info!(user_id = %id, "Removed user");
            Ok(())
        }
    }
}

fn log_event(user: &str, event: &LoopEvent) {
    match event {
        LoopEvent::Transition(event) => {
            let transition = event.transition();
            let title = transition
                .presence
                .game
                .as_ref()
                .map(|game| game.name.as_str())
                .unwrap_or("");

            match event {
                TransitionEvent::FriendOnline(_) => {
                    info!(user, name = transition.subject.name(), title, "Friend online")
                }
                TransitionEvent::FriendOffline(_) => {
                    info!(user, name = transition.subject.name(), "Friend offline")
                }
                TransitionEvent::TitleChange(_) => {
                    info!(user, name = transition.subject.name(), title, "Friend playing")
                }
                TransitionEvent::TitleStateChange(_) => info!(
                    user,
                    name = transition.subject.name(),
                    title,
                    status = transition
                        .presence
                        .game
                        .as_ref()
                        .map(|game| game.sys_description.as_str())
                        .unwrap_or(""),
                    "Friend status changed"
                ),
            }
        }
        LoopEvent::PollFailed(failure) => warn!(
            user,
            code = %failure.code,
            retryable = failure.retryable,
            "Failed to update presence: {}",
            failure.message
        ),
    }
}

async fn notify(state: &AppState, users: &[String]) -> color_eyre::Result<()> {
    let users = if users.is_empty() {
        let user = match state.config.user.clone() {
            Some(user) => user,
            None => state
                .cache
                .selected_user()
                .await?
                .ok_or_else(|| eyre!("No user selected. Run `nxapi auth login` first."))?,
        };
        vec![user]
    } else {
        users.to_vec()
    };

    let mut handles: Vec<LoopHandle> = Vec::new();
    let mut tasks = Vec::new();

    for user in users {
        let session_token = state.session_token(Some(&user)).await?;
        let coral = state.sessions.coral(&session_token).await?;
        let source = CoralPresenceSource::new(Arc::new(coral), state.clock.clone());

        let (tx, mut rx) = mpsc::channel(64);
        let (notification_loop, handle) =
            NotificationLoop::new(source, LoopConfig::from(state.config.as_ref()), tx);
        handles.push(handle);

        info!(user = %user, "Watching friend presence");
        tasks.push(tokio::spawn(notification_loop.run()));
        tasks.push(tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                log_event(&user, &event);
            }
            crate::notify::LoopState::Stopped
        }));
    }

    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {:?}", err);
            return;
        }
        info!("Stopping");
        for handle in handles {
            handle.stop();
        }
    });

    futures::future::try_join_all(tasks).await?;
    Ok(())
}

async fn proxy(
    state: &AppState,
    user: Option<&str>,
    command: &ProxyCommand,
) -> color_eyre::Result<()> {
    match command {
        ProxyCommand::Serve { listen } => {
            let listen = listen.as_deref().unwrap_or(&state.config.proxy_listen);
            routes::serve(state.clone(), listen).await
        }
        ProxyCommand::CreateToken(args) => {
            let session_token = state.session_token(user).await?;
            let credential = state.sessions.credential(&session_token).await?;

            let flags = PolicyFlags::from(args.clone());
            let token = PolicyStore::new(state.store.clone())
                .create(&credential.user_id, flags, state.clock.now_ms())
                .await?;

            print_json(&token)
        }
        ProxyCommand::RevokeToken { token } => {
            PolicyStore::new(state.store.clone()).revoke(token).await?;
            info!("Revoked proxy token");
            Ok(())
        }
    }
}
