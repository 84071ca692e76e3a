#![deny(dead_code)] // DO NOT REMOVE THIS EVER
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use log::{debug, error, info, LevelFilter};
use std::collections::HashSet;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

mod credentials;
mod utils;

use crate::credentials::{load_session, save_session, set_session_path_override, SavedSession};
use swapmeet::api::{ExchangeApi, HttpExchangeApi, MeetingResponse};
use swapmeet::negotiation::{Aggregate, PaymentState, Rating, SessionEvent};
use swapmeet::{
    ChatMessage, Dashboard, DeliveryStatus, MeetingLocation, MeetingState, NegotiationSession,
    ProposedValue, SessionConfig,
};

const WRAP_WIDTH: usize = 78;
const COUNTDOWN_EVERY: Duration = Duration::from_secs(60);

/// Command line arguments for swapmeet
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "swapmeet: negotiate and settle peer-to-peer currency exchanges from the terminal.",
    long_about = "swapmeet talks to an exchange marketplace server to agree a meeting time and place \
    with a counterparty, chat with them, pay and complete the exchange.\n\n\
    The server and session token are read from --server/--token, then SWAPMEET_SERVER/SWAPMEET_TOKEN, \
    then the session saved by `swapmeet login`."
)]
struct Args {
    /// Server base URL, e.g. https://swap.example
    #[arg(long, global = true, value_name = "URL")]
    server: Option<String>,

    /// Session token
    #[arg(long, global = true, value_name = "TOKEN")]
    token: Option<String>,

    /// Where log output goes
    #[arg(long, global = true, value_name = "PATH", default_value = "swapmeet.log")]
    log_file: PathBuf,

    /// Override the saved session file location
    #[arg(long, global = true, value_name = "PATH")]
    session_file: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Save the server and session token for later commands
    Login,
    /// Show the dashboard summary, purchased contacts and open negotiations
    Dashboard,
    /// Show the meeting state and what happens next for a listing
    Status { listing: String },
    /// Propose a meeting time (RFC 3339, e.g. 2025-11-21T18:00:00Z)
    ProposeTime {
        listing: String,
        time: String,
        #[arg(long)]
        message: Option<String>,
    },
    /// Propose a meeting place
    ProposeLocation {
        listing: String,
        name: String,
        #[arg(long, allow_hyphen_values = true, requires = "lon")]
        lat: Option<f64>,
        #[arg(long, allow_hyphen_values = true, requires = "lat")]
        lon: Option<f64>,
        #[arg(long)]
        message: Option<String>,
    },
    /// Accept or reject the counterparty's proposal
    Respond {
        listing: String,
        proposal_id: String,
        #[arg(value_enum)]
        answer: Answer,
    },
    /// Chat with the counterparty (type /quit to leave)
    Chat { listing: String },
    /// Pay your side of a confirmed exchange
    Pay { listing: String },
    /// Complete a confirmed exchange and optionally rate the counterparty
    Complete {
        listing: String,
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=5))]
        stars: Option<u8>,
        #[arg(long, requires = "stars")]
        comment: Option<String>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Answer {
    Accept,
    Reject,
}

impl From<Answer> for MeetingResponse {
    fn from(answer: Answer) -> Self {
        match answer {
            Answer::Accept => MeetingResponse::Accepted,
            Answer::Reject => MeetingResponse::Rejected,
        }
    }
}

/// Flags first, then environment variables, then the saved session
fn resolve_config(args: &Args) -> Result<SessionConfig> {
    let saved = load_session()?;

    let server = args
        .server
        .clone()
        .or_else(|| env::var("SWAPMEET_SERVER").ok())
        .or_else(|| saved.as_ref().map(|s| s.server.clone()))
        .ok_or_else(|| anyhow!("No server configured. Run `swapmeet login` or pass --server"))?;

    let token = args
        .token
        .clone()
        .or_else(|| env::var("SWAPMEET_TOKEN").ok())
        .or_else(|| saved.as_ref().and_then(|s| s.get_token()));

    let mut config = SessionConfig::new(&server);
    if let Some(token) = token {
        config = config.with_token(&token);
    }
    debug!("Using server {}", config.base_url);
    Ok(config)
}

fn connect(config: &SessionConfig) -> Result<Arc<dyn ExchangeApi>> {
    let api = HttpExchangeApi::new(config).context("Failed to build HTTP client")?;
    Ok(Arc::new(api))
}

/// Open a listing's negotiation and load it once
async fn open_session(
    config: SessionConfig,
    listing: &str,
) -> Result<(NegotiationSession, mpsc::Receiver<SessionEvent>)> {
    let api = connect(&config)?;
    let (session, events) = NegotiationSession::new(config, api, listing);
    session
        .reload()
        .await
        .with_context(|| format!("Failed to load listing {}", listing))?;
    Ok((session, events))
}

async fn login(args: &Args) -> Result<()> {
    let default_server = args.server.clone().or_else(|| env::var("SWAPMEET_SERVER").ok());
    let server = utils::prompt("Server URL", default_server.as_deref())?;
    if server.is_empty() {
        return Err(anyhow!("A server URL is required"));
    }

    let token = match args.token.clone().or_else(|| env::var("SWAPMEET_TOKEN").ok()) {
        Some(token) => token,
        None => utils::prompt("Session token", None)?,
    };

    let config = SessionConfig::new(&server).with_token(&token);
    let api = connect(&config)?;
    api.get_dashboard_summary(config.token()?)
        .await
        .context("The server did not accept this session token")?;

    let path = save_session(&SavedSession::new(&config.base_url, &token))?;
    println!("Logged in to {}. Session saved to {}", config.base_url, path.display());
    Ok(())
}

async fn show_dashboard(config: SessionConfig) -> Result<()> {
    let api = connect(&config)?;
    let dashboard = Dashboard::new(config, api);
    dashboard.refresh().await?;
    let snapshot = dashboard.snapshot().await;

    println!(
        "Active listings: {}   Pending actions: {}   Completed exchanges: {}",
        snapshot.summary.active_listings,
        snapshot.summary.pending_actions,
        snapshot.summary.completed_exchanges
    );

    println!("\nNegotiations:");
    if snapshot.negotiations.is_empty() {
        println!("  (none)");
    }
    for negotiation in &snapshot.negotiations {
        println!(
            "  {:<12} {:<20} {}",
            negotiation.listing_id,
            negotiation.counterparty_name,
            negotiation.status_hint.as_deref().unwrap_or("")
        );
    }
    let attention = snapshot.needing_attention().count();
    if attention > 0 {
        println!("  {} negotiation(s) flagged by the server", attention);
    }

    println!("\nPurchased contacts:");
    if snapshot.contacts.is_empty() {
        println!("  (none)");
    }
    for contact in &snapshot.contacts {
        println!("  {:<12} {}", contact.listing_id, contact.display_name);
    }
    Ok(())
}

fn describe_value(value: &ProposedValue) -> String {
    match value {
        ProposedValue::Time(at) => at.format("%Y-%m-%d %H:%M UTC").to_string(),
        ProposedValue::Location(location) => match location.coordinates() {
            Some((lat, lon)) => format!("{} ({:.5}, {:.5})", location.name, lat, lon),
            None => location.name.clone(),
        },
    }
}

fn print_status(
    state: &MeetingState,
    aggregate: &Aggregate,
    payments: &PaymentState,
    hint: Option<&str>,
) {
    match state.accepted_time() {
        Some(time) => println!("Time:      {} (accepted)", time.at.format("%Y-%m-%d %H:%M UTC")),
        None => println!("Time:      not agreed"),
    }
    match state.accepted_location() {
        Some(location) => println!(
            "Location:  {} (accepted)",
            describe_value(&ProposedValue::Location(location.location.clone()))
        ),
        None => println!("Location:  not agreed"),
    }

    let pending = [aggregate.pending_time(), aggregate.pending_location()];
    let counters = [aggregate.counter_time(), aggregate.counter_location()];
    for proposal in pending.into_iter().flatten() {
        println!(
            "Pending:   [{}] {} by {}",
            proposal.id,
            describe_value(&proposal.value),
            if proposal.proposer_is_self { "you" } else { proposal.proposer_display_name.as_str() }
        );
    }
    for proposal in counters.into_iter().flatten() {
        println!("Counter:   [{}] {}", proposal.id, describe_value(&proposal.value));
    }

    println!("Next:      {}", aggregate.action_label());
    if let Some(hint) = hint {
        println!("Server:    {}", hint);
    }
    if state.is_confirmed() {
        let paid = |at: Option<DateTime<Utc>>| match at {
            Some(at) => format!("paid {}", at.format("%Y-%m-%d %H:%M")),
            None => "not paid".to_string(),
        };
        println!(
            "Payment:   you {}, counterparty {}",
            paid(payments.self_paid_at),
            paid(payments.counterparty_paid_at)
        );
        if let Some(remaining) = state.time_until(Utc::now()).and_then(|d| d.to_std().ok()) {
            println!("Meeting in {}", utils::format_countdown(remaining));
        }
    }
}

async fn show_status(session: &NegotiationSession) {
    let state = session.meeting_state().await;
    let aggregate = session.aggregate().await;
    let payments = session.payment_state().await;
    let hint = session.display_status_hint().await;
    println!("Listing {}", session.listing_id());
    print_status(&state, &aggregate, &payments, hint.as_deref());
}

fn print_message(message: &ChatMessage) {
    let sender = if message.from_self { "you" } else { "them" };
    let mut line = utils::format_chat_line(message.sent_at, sender, &message.text, WRAP_WIDTH);
    match message.delivery_status {
        DeliveryStatus::Sending => line.push_str(" (sending)"),
        DeliveryStatus::Failed => line.push_str(" (failed)"),
        DeliveryStatus::Sent | DeliveryStatus::Delivered => {}
    }
    println!("{}", line);
}

/// Messages whose ids have not been seen yet, marking them seen
fn take_unseen<'a>(seen: &mut HashSet<String>, messages: &'a [ChatMessage]) -> Vec<&'a ChatMessage> {
    let mut unseen = Vec::new();
    for message in messages {
        if seen.insert(message.id.clone()) {
            unseen.push(message);
        }
    }
    unseen
}

/// Interactive chat: polls at the chat cadence and sends each typed line
async fn chat(mut session: NegotiationSession, mut events: mpsc::Receiver<SessionEvent>) -> Result<()> {
    let mut printed: HashSet<String> = HashSet::new();
    for message in session.messages().await {
        print_message(&message);
        printed.insert(message.id);
    }
    println!("-- {} -- type a message, /status, or /quit", session.action_label().await);

    session.start_polling();
    session.start_countdown(COUNTDOWN_EVERY);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    SessionEvent::MessagesChanged(messages) => {
                        // Our own lines are already on screen as typed
                        for message in take_unseen(&mut printed, &messages) {
                            if !message.from_self {
                                print_message(message);
                            }
                        }
                    }
                    SessionEvent::DeliveryStatusChanged { id, status: DeliveryStatus::Failed } => {
                        eprintln!("! message {} could not be sent", id);
                    }
                    SessionEvent::MeetingChanged { label, .. } => println!("-- {} --", label),
                    SessionEvent::Banner(text) => eprintln!("! {}", text),
                    SessionEvent::Countdown(remaining) => {
                        println!("-- meeting in {} --", utils::format_countdown(remaining))
                    }
                    SessionEvent::Finished => break,
                    SessionEvent::DeliveryStatusChanged { .. } | SessionEvent::PaymentChanged(_) => {}
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match line.trim() {
                    "" => {}
                    "/quit" => break,
                    "/status" => show_status(&session).await,
                    text => match session.send_message(text).await {
                        Ok(pending) => debug!("Queued {}", pending.local_id),
                        Err(e) => eprintln!("! {}", e),
                    },
                }
            }
        }
    }

    session.close();
    info!("Left chat for listing {}", session.listing_id());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { LevelFilter::Debug } else { LevelFilter::Info };
    utils::setup_logging(args.log_file.to_str(), level)?;
    info!("swapmeet starting up");
    info!("System information: {} {}", std::env::consts::OS, std::env::consts::ARCH);

    if let Some(path) = &args.session_file {
        set_session_path_override(path.clone());
        info!("Session file overridden to: {}", path.display());
    }

    let result = run(&args).await;
    if let Err(e) = &result {
        error!("{:#}", e);
    }
    result
}

async fn run(args: &Args) -> Result<()> {
    if let Command::Login = args.command {
        return login(args).await;
    }

    let config = resolve_config(args)?;
    match &args.command {
        Command::Login => Ok(()),
        Command::Dashboard => show_dashboard(config).await,
        Command::Status { listing } => {
            let (session, _events) = open_session(config, listing).await?;
            show_status(&session).await;
            Ok(())
        }
        Command::ProposeTime { listing, time, message } => {
            let at = DateTime::parse_from_rfc3339(time)
                .with_context(|| format!("Invalid time '{}', expected RFC 3339", time))?
                .with_timezone(&Utc);
            let (session, _events) = open_session(config, listing).await?;
            session.propose_time(at, message.as_deref()).await?;
            println!("Proposed {}", at.format("%Y-%m-%d %H:%M UTC"));
            show_status(&session).await;
            Ok(())
        }
        Command::ProposeLocation { listing, name, lat, lon, message } => {
            let location = match (lat, lon) {
                (Some(lat), Some(lon)) => MeetingLocation::with_coordinates(name, *lat, *lon),
                _ => MeetingLocation::named(name),
            };
            let (session, _events) = open_session(config, listing).await?;
            session.propose_location(location, message.as_deref()).await?;
            println!("Proposed {}", name.trim());
            show_status(&session).await;
            Ok(())
        }
        Command::Respond { listing, proposal_id, answer } => {
            let (session, _events) = open_session(config, listing).await?;
            let response = MeetingResponse::from(*answer);
            session.respond(proposal_id, response).await?;
            println!("Proposal {} {}", proposal_id, response.as_str());
            show_status(&session).await;
            Ok(())
        }
        Command::Chat { listing } => {
            let (session, events) = open_session(config, listing).await?;
            chat(session, events).await
        }
        Command::Pay { listing } => {
            let (session, _events) = open_session(config, listing).await?;
            session.mark_paid().await?;
            println!("Payment submitted");
            show_status(&session).await;
            Ok(())
        }
        Command::Complete { listing, stars, comment } => {
            let (mut session, _events) = open_session(config, listing).await?;
            let prompt = session.complete_exchange().await?;
            println!("Exchange completed");
            match stars {
                Some(stars) => {
                    let rating = Rating::new(*stars, comment.as_deref())?;
                    session.submit_rating(&prompt, rating).await?;
                    println!("Rated the counterparty {} star(s). Thanks!", stars);
                }
                None => println!("Rate the counterparty with `--stars 1-5`"),
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_take_unseen_marks_each_message_once() {
        let at = Utc.with_ymd_and_hms(2025, 11, 20, 18, 0, 0).unwrap();
        let first = vec![
            ChatMessage::from_server("srv-1", "hi", at, false),
            ChatMessage::from_server("srv-2", "hello", at, true),
        ];
        let mut seen = HashSet::new();

        let ids: Vec<&str> = take_unseen(&mut seen, &first).iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["srv-1", "srv-2"]);

        let mut second = first.clone();
        second.push(ChatMessage::from_server("srv-3", "see you", at, false));
        let ids: Vec<&str> = take_unseen(&mut seen, &second).iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["srv-3"]);
        assert!(take_unseen(&mut seen, &second).is_empty());
    }
}
