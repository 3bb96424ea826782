use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use superyap_client::deep_link::share_url;
use superyap_client::{
    Backend, ClientConfig, ContactEvent, ContactSyncEngine, ContactView, DeepLink, Identity,
    MessageEvent, MessageSyncEngine, MessageView, ReactionChange, Session, SyncError,
};
use superyap_shared::{MessageId, ProfileUpdate, UserId};
use superyap_store::SessionCache;
use tokio::time::timeout;
use tracing::info;

use crate::{Cli, Command};

/// How long to keep listening after the last remote snapshot.
const REMOTE_SETTLE: Duration = Duration::from_millis(1500);

pub async fn run(cli: Cli, config: ClientConfig) -> anyhow::Result<()> {
    let store = config.open_store().context("Failed to open store")?;
    let cache = Arc::new(config.open_cache().context("Failed to open session cache")?);
    let wait = match config.backend {
        Backend::Local => Duration::ZERO,
        Backend::Remote => REMOTE_SETTLE,
    };

    let identity = identity_for(&cli, &cache)?;
    let mut session = Session::start(store, &identity, Some(Arc::clone(&cache)))
        .await
        .context("Sign-in failed")?;
    info!(user = %session.user_id(), "Signed in");

    let mut contacts = session.contact_engine(&config);
    contacts.start()?;
    settle_contacts(&mut contacts, wait).await?;
    let mut messages = session.message_engine(&config);

    let json = cli.json;
    match cli.command {
        Command::Login => print_profile(&session, json)?,

        Command::Profile { username, avatar } => {
            let update = ProfileUpdate { username, avatar };
            session.update_profile(&update).await?;
            print_profile(&session, json)?;
        }

        Command::Add { id } => {
            let contact = contacts.add_contact(&UserId::new(id)?).await?;
            settle_contacts(&mut contacts, wait).await?;
            if json {
                print_json(&contact)?;
            } else {
                println!("Added {} ({})", contact.username, contact.id);
            }
        }

        Command::Remove { id } => {
            let id = UserId::new(id)?;
            contacts.remove_contact(&id).await?;
            settle_contacts(&mut contacts, wait).await?;
            println!("Removed {id}");
        }

        Command::Pin { id, off } => {
            let id = UserId::new(id)?;
            contacts.set_pinned(&id, !off).await?;
            settle_contacts(&mut contacts, wait).await?;
            println!("{} {id}", if off { "Unpinned" } else { "Pinned" });
        }

        Command::Contacts => print_contacts(&contacts, &config, json)?,

        Command::Send { peer, text } => {
            open(&mut messages, &peer, wait).await?;
            let id = messages.send(&text.join(" ")).await?;
            println!("{id}");
        }

        Command::Sticker { peer, index } => {
            open(&mut messages, &peer, wait).await?;
            let id = messages.send_sticker(index).await?;
            println!("{id}");
        }

        Command::History { peer } => {
            open(&mut messages, &peer, wait).await?;
            print_history(&messages, json)?;
        }

        Command::React {
            peer,
            message,
            emoji,
        } => {
            open(&mut messages, &peer, wait).await?;
            let change = messages
                .toggle_reaction(&MessageId::new(message)?, &emoji)
                .await?;
            match change {
                ReactionChange::Added => println!("Reacted {emoji}"),
                ReactionChange::Removed => println!("Removed {emoji}"),
            }
        }

        Command::Delete { peer, message } => {
            open(&mut messages, &peer, wait).await?;
            let id = MessageId::new(message)?;
            messages.delete_own_message(&id).await?;
            println!("Deleted {id}");
        }

        Command::OpenLink { url } => {
            let link = DeepLink::parse(&url)?;
            match session.handle_deep_link(&link, &mut contacts).await? {
                Some(contact) => {
                    settle_contacts(&mut contacts, wait).await?;
                    open(&mut messages, contact.id.as_str(), wait).await?;
                    println!("Chatting with {} ({})", contact.username, contact.id);
                    print_history(&messages, json)?;
                }
                None => println!("Nothing to open"),
            }
            println!("{}", link.cleaned_url());
        }

        Command::ShareLink { origin } => {
            println!("{}", share_url(&origin, session.user_id())?);
        }

        Command::Logout => {
            contacts.stop();
            session.sign_out()?;
            println!("Signed out");
            return Ok(());
        }
    }

    session.persist_contacts(&contacts)?;
    Ok(())
}

fn identity_for(cli: &Cli, cache: &SessionCache) -> anyhow::Result<Identity> {
    let mut identity = match cli.user {
        Some(ref id) => Identity::new(UserId::new(id.as_str())?),
        None => match cache.load_profile()? {
            Some(profile) => Identity::new(profile.id),
            None => Identity::local(),
        },
    };
    if let Some(ref name) = cli.name {
        identity = identity.with_display_name(name.as_str());
    }
    Ok(identity)
}

async fn settle_contacts(engine: &mut ContactSyncEngine, wait: Duration) -> anyhow::Result<()> {
    for event in engine.pump() {
        check_contact_event(event)?;
    }
    if wait.is_zero() {
        return Ok(());
    }
    while let Ok(Some(event)) = timeout(wait, engine.next_event()).await {
        check_contact_event(event)?;
    }
    Ok(())
}

fn check_contact_event(event: ContactEvent) -> anyhow::Result<()> {
    match event {
        ContactEvent::SubscriptionFailed(failure) => {
            Err(SyncError::from(failure)).context("Contact sync stopped")
        }
        _ => Ok(()),
    }
}

async fn open(engine: &mut MessageSyncEngine, peer: &str, wait: Duration) -> anyhow::Result<()> {
    engine.open(&UserId::new(peer)?)?;
    let mut events = engine.pump();
    if !wait.is_zero() {
        while let Ok(Some(event)) = timeout(wait, engine.next_event()).await {
            events.push(event);
        }
    }
    for event in events {
        if let MessageEvent::SubscriptionFailed(failure) = event {
            return Err(SyncError::from(failure)).context("Conversation sync stopped");
        }
    }
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_profile(session: &Session, json: bool) -> anyhow::Result<()> {
    let profile = session.profile();
    if json {
        return print_json(profile);
    }
    println!("{} ({})", profile.username, profile.id);
    println!("avatar: {}", profile.avatar);
    Ok(())
}

fn print_contacts(engine: &ContactSyncEngine, config: &ClientConfig, json: bool) -> anyhow::Result<()> {
    let now = Utc::now();
    let views: Vec<ContactView> = engine
        .sorted()
        .iter()
        .map(|c| ContactView::new(c, &config.obfuscation_key, now))
        .collect();
    if json {
        return print_json(&views);
    }
    if views.is_empty() {
        println!("No contacts yet");
    }
    for view in views {
        println!(
            "{} {} ({})  {}  {}",
            if view.pinned { "*" } else { " " },
            view.username,
            view.id,
            view.preview,
            view.time_ago.unwrap_or_default(),
        );
    }
    Ok(())
}

fn print_history(engine: &MessageSyncEngine, json: bool) -> anyhow::Result<()> {
    let views: Vec<MessageView> = engine.decoded().iter().map(MessageView::from).collect();
    if json {
        return print_json(&views);
    }
    for view in views {
        let time = DateTime::<Utc>::from_timestamp_millis(view.timestamp)
            .map(|t| t.with_timezone(&Local).format("%H:%M").to_string())
            .unwrap_or_default();
        let body = match (view.text, view.sticker) {
            (Some(text), _) => text,
            (None, Some(index)) => format!("[sticker {index}]"),
            (None, None) => String::new(),
        };
        let sender = if view.is_own { "you" } else { view.sender_id.as_str() };
        let reactions: Vec<String> = view
            .reactions
            .iter()
            .map(|(emoji, count)| format!("{emoji}{count}"))
            .collect();
        println!("{}  {time}  {sender}: {body}  {}", view.id, reactions.join(" "));
    }
    Ok(())
}
