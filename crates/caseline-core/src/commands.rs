use anyhow::{Context, anyhow, bail};
use caseline_shared::{EntitySearchArgs, Identity};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::bootstrap::{BootstrapPhase, Route};
use crate::cli::{CallCommand, Command};
use crate::engine::Engine;
use crate::query::SearchOutcome;

#[instrument(skip(engine, identity, command))]
pub async fn dispatch(
    engine: &Engine,
    identity: Option<Identity>,
    command: Command,
) -> anyhow::Result<()> {
    let phase = engine.bootstrap.run(Route::Protected, identity).await;
    debug!(?phase, command = ?command, "dispatching command");

    if matches!(command, Command::Bootstrap) {
        return print_json(&json!({ "phase": phase }));
    }

    let identity = match (phase, identity) {
        (BootstrapPhase::Ready, Some(identity)) => identity,
        (BootstrapPhase::Idle, _) => bail!("no signed-in user; pass --user or set CASELINE_USER"),
        _ => bail!("session warm-up did not complete; see the log for missing keys"),
    };
    let actor = identity.user_id;

    match command {
        Command::Bootstrap => Ok(()),
        Command::Search {
            term,
            kind,
            archived,
        } => cmd_search(engine, &term, kind.map(Into::into), archived).await,
        Command::Attend { entity } => {
            info!(%entity, "command attend");
            let attendance = engine.attendance(actor);
            let confirmation = attendance
                .mark_attended(entity)
                .await
                .with_context(|| format!("failed to mark {entity} as attended"))?;
            attendance.settle().await;
            print_json(&confirmation)
        }
        Command::Unattend { entity } => {
            info!(%entity, "command unattend");
            let attendance = engine.attendance(actor);
            let confirmation = attendance
                .unmark_attended(entity)
                .await
                .with_context(|| format!("failed to unmark {entity}"))?;
            attendance.settle().await;
            print_json(&confirmation)
        }
        Command::Call { action } => cmd_call(engine, actor, action).await,
        Command::History => {
            let history = engine.contacts.history(actor).await?;
            print_json(&history)
        }
        Command::Status { entity, text } => cmd_status(engine, actor, entity, &text.join(" ")).await,
        Command::CountToday => {
            let provisional = engine.aggregates.provisional_attended_today();
            let count = engine.aggregates.attended_today().await?;
            print_json(&json!({
                "date": engine.calendar.today(),
                "provisional": provisional,
                "count": count,
            }))
        }
        Command::Tasks => {
            let tasks = engine.aggregates.open_tasks().await?;
            print_json(&tasks)
        }
    }
}

#[instrument(skip(engine))]
async fn cmd_search(
    engine: &Engine,
    term: &str,
    kind: Option<caseline_shared::EntityKind>,
    include_archived: bool,
) -> anyhow::Result<()> {
    let args = EntitySearchArgs {
        kind,
        include_archived,
    };
    match engine.search.search(term, args).await {
        SearchOutcome::Applied(items) => print_json(&items),
        SearchOutcome::Failed(err) => Err(anyhow!(err).context("search failed")),
        SearchOutcome::Superseded => bail!("search was superseded"),
    }
}

#[instrument(skip(engine, action))]
async fn cmd_call(engine: &Engine, actor: Uuid, action: CallCommand) -> anyhow::Result<()> {
    match action {
        CallCommand::Done { task } => {
            info!(%task, "command call done");
            let outcome = engine
                .contacts
                .complete_contact_task(task, actor)
                .await
                .with_context(|| format!("failed to complete task {task}"))?;
            print_json(&outcome)
        }
        CallCommand::Reopen { task } => {
            info!(%task, "command call reopen");
            let outcome = engine
                .contacts
                .reopen_contact_task(task)
                .await
                .with_context(|| format!("failed to reopen task {task}"))?;
            print_json(&outcome)
        }
        CallCommand::Log { entity, note } => {
            info!(%entity, "command call log");
            let logged = engine
                .contacts
                .log_phone_call(entity, actor, note.as_deref())
                .await
                .with_context(|| format!("failed to log call for {entity}"))?;
            print_json(&logged)
        }
    }
}

#[instrument(skip(engine, text))]
async fn cmd_status(engine: &Engine, actor: Uuid, entity: Uuid, text: &str) -> anyhow::Result<()> {
    let confirmation = engine
        .status_updates(actor)
        .append(entity, text)
        .await
        .with_context(|| format!("failed to add status update to {entity}"))?;
    print_json(&confirmation)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    let text = serde_json::to_string_pretty(value).context("failed to encode output")?;
    println!("{text}");
    Ok(())
}
