use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Parser, Subcommand};
use sawt_client::{AnswerClient, SawtClient};
use sawt_core::preview::{self, Preview};
use sawt_core::{BiasReport, Card, CardApi, CardId, CardSource, CardType, ClientConfig};
use sawt_feed::{Feed, FeedSession, LikeCounter, LikeOutcome, LikedCards, SubmissionState};

#[derive(Debug, Parser)]
#[command(name = "sawt-cli")]
#[command(about = "Browse and query the Sawt results feed")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List the newest public cards
    Feed {
        /// Extra pages to load after the first one
        #[arg(long, default_value_t = 0)]
        pages: usize,
    },
    /// Show one card with its answer and citations
    Show { id: String },
    /// Submit a query and wait for its answer
    Ask {
        query: String,
        /// `general` or `in-depth`
        #[arg(long, default_value = "general")]
        mode: CardType,
        #[arg(long, default_value_t = 120)]
        timeout_secs: u64,
    },
    /// Like a card (once per user)
    Like { id: String },
    /// Report an answer as biased or inaccurate
    Report {
        id: String,
        /// Bias category, repeatable
        #[arg(long = "kind")]
        kinds: Vec<String>,
        #[arg(long, default_value = "")]
        comment: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = sawt_core::load_client_config().context("failed to load client configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let Some(command) = cli.command else {
        println!("sawt-cli ready; run with --help for commands");
        return Ok(());
    };

    let client = Arc::new(SawtClient::new(&config).context("failed to build API client")?);

    match command {
        Commands::Feed { pages } => run_feed(client, &config, pages).await,
        Commands::Show { id } => run_show(client.as_ref(), &CardId::new(id)).await,
        Commands::Ask {
            query,
            mode,
            timeout_secs,
        } => run_ask(client, &config, &query, mode, Duration::from_secs(timeout_secs)).await,
        Commands::Like { id } => run_like(client, &config, CardId::new(id)).await,
        Commands::Report { id, kinds, comment } => {
            run_report(client.as_ref(), &CardId::new(id), kinds, comment).await
        }
    }
}

async fn run_feed(client: Arc<SawtClient>, config: &ClientConfig, pages: usize) -> anyhow::Result<()> {
    let feed = Feed::new(client, config.page_size);
    feed.load_initial()
        .await
        .context("failed to load the feed")?;

    for _ in 0..pages {
        let outcome = feed
            .fetch_next_page()
            .await
            .context("failed to load more cards")?;
        if !outcome.has_more {
            break;
        }
    }

    let cards = feed.snapshot().await;
    if cards.is_empty() {
        println!("no public cards yet");
        return Ok(());
    }
    for card in &cards {
        print_summary(card);
    }
    if !feed.has_more().await {
        println!("-- end of feed --");
    }
    Ok(())
}

async fn run_show(client: &SawtClient, id: &CardId) -> anyhow::Result<()> {
    let card = client
        .fetch_card(id)
        .await
        .with_context(|| format!("failed to fetch card {id}"))?;
    print_detail(&card);
    Ok(())
}

async fn run_ask(
    client: Arc<SawtClient>,
    config: &ClientConfig,
    query: &str,
    mode: CardType,
    timeout: Duration,
) -> anyhow::Result<()> {
    let endpoint = config
        .answer_endpoint
        .as_deref()
        .context("SAWT_ANSWER_ENDPOINT must be set to submit queries")?;
    let answers = Arc::new(AnswerClient::new(endpoint, config.request_timeout_secs)?);
    let session = FeedSession::new(client, answers, config);

    let card_id = session.composer.submit(query, mode).await?;
    println!("submitted {card_id} ({})", preview::card_path(&card_id));
    tracing::debug!(card_id = %card_id, timeout_secs = timeout.as_secs(), "waiting for answer");

    let started = Instant::now();
    let mut state = session.composer.subscribe();
    let outcome = tokio::time::timeout(timeout, async {
        loop {
            let current = state.borrow_and_update().clone();
            match current {
                SubmissionState::Resolved { .. } => return true,
                SubmissionState::Idle => return false,
                SubmissionState::Submitting | SubmissionState::AwaitingAnswer { .. } => {}
            }
            tokio::select! {
                changed = state.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                }
                () = tokio::time::sleep(preview::LOADING_MESSAGE_INTERVAL) => {
                    eprintln!("{}", preview::loading_message(started.elapsed()));
                }
            }
        }
    })
    .await;

    let result = match outcome {
        Ok(true) => match session.feed.get(&card_id).await {
            Some(card) => {
                print_detail(&card);
                Ok(())
            }
            None => Err(anyhow::anyhow!("card {card_id} left the feed")),
        },
        Ok(false) => Err(anyhow::anyhow!(
            "answer service did not accept the query for {card_id}"
        )),
        Err(_) => Err(anyhow::anyhow!(
            "no answer for {card_id} after {}s; check back with `sawt-cli show {card_id}`",
            timeout.as_secs()
        )),
    };

    session.composer.unmount().await;
    result
}

async fn run_like(client: Arc<SawtClient>, config: &ClientConfig, id: CardId) -> anyhow::Result<()> {
    let card = client
        .fetch_card(&id)
        .await
        .with_context(|| format!("failed to fetch card {id}"))?;

    let feed = Feed::new(client.clone(), config.page_size);
    feed.upsert(card).await;
    let counter = LikeCounter::new(feed, client, LikedCards::load(&config.liked_cards_path));

    match counter.like(&id).await? {
        LikeOutcome::Liked { likes } => println!("liked {id}; {likes} likes"),
        LikeOutcome::AlreadyLiked => println!("already liked {id}"),
    }
    Ok(())
}

async fn run_report(
    client: &SawtClient,
    id: &CardId,
    kinds: Vec<String>,
    comment: String,
) -> anyhow::Result<()> {
    if let Some(unknown) = kinds
        .iter()
        .find(|k| !sawt_core::BIAS_CATEGORIES.contains(&k.as_str()))
    {
        anyhow::bail!(
            "unknown bias category {unknown:?}; expected one of: {}",
            sawt_core::BIAS_CATEGORIES.join(", ")
        );
    }

    let report = BiasReport::new(kinds, comment);
    report.validate()?;
    client
        .report_bias(id, &report)
        .await
        .with_context(|| format!("failed to report card {id}"))?;
    println!("report {} recorded for {id}", report.id);
    Ok(())
}

fn print_summary(card: &Card) {
    let created = card
        .created_at
        .map_or_else(|| "-".to_string(), |t| t.format("%Y-%m-%d %H:%M").to_string());
    println!(
        "{}  [{}]  {}  ({} likes)",
        card.id, card.card_type, created, card.likes
    );
    println!("  {}", card.title);
    match preview::preview(card, Duration::ZERO) {
        Preview::Answered { excerpt } => println!("  {excerpt}"),
        Preview::Pending { message } => println!("  {message}"),
    }
    println!();
}

fn print_detail(card: &Card) {
    println!("{}", card.title);
    println!("{} | {} | {} likes", card.card_type, card.status.as_str(), card.likes);
    println!();

    if card.is_pending() {
        println!("{}", preview::loading_message(Duration::ZERO));
        return;
    }
    for fragment in &card.responses {
        println!("{}", fragment.response);
        println!();
    }

    if let Some(thumb) = preview::thumbnail(&card.citations)
        .and_then(|c| c.source_url.as_deref())
        .and_then(preview::youtube_thumbnail_url)
    {
        println!("thumbnail: {thumb}");
    }

    for (n, citation) in card.citations.iter().enumerate() {
        let title = citation.source_title.as_deref().unwrap_or("untitled source");
        let source = citation.source_name.as_deref().unwrap_or("unknown");
        println!("[{}] {title} ({source})", n + 1);
        if let Some(url) = citation.source_url.as_deref() {
            let link = preview::youtube_embed_url(url, citation.source_timestamp.as_deref())
                .unwrap_or_else(|| url.to_string());
            println!("    {link}");
        }
        if let Some(page) = citation.source_page_number.as_deref() {
            println!("    page {page}");
        }
    }
}
