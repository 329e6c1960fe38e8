//! `dshadow state`: patch, report, remove, stream or read device state.
//!
//! Steps run in a fixed order: patch, report, remove (which ends the
//! invocation), stream (which runs until it fails or is cancelled), and
//! finally a batch read of every named device.

use std::io::Write;

use anyhow::bail;
use futures::StreamExt;

use ds_protocol::{
    Document, KeyPath, ShadowResult, StateKey, StreamRequest, document, parse_remove_target,
};
use ds_shadow_client::{Session, SessionRequest, TransportChoice};

use crate::cli::StateArgs;
use crate::output::JsonLines;

/// A validated `state` invocation. Building one touches no network.
#[derive(Debug, Clone, PartialEq)]
pub struct StatePlan {
    pub target: String,
    pub devices: Vec<String>,
    pub patch: Option<Document>,
    pub report: Option<Document>,
    pub remove: Option<(StateKey, KeyPath)>,
    pub stream: Option<StreamRequest>,
}

impl StatePlan {
    pub fn from_args(args: &StateArgs) -> ShadowResult<Self> {
        let target = args.devices.first().cloned().unwrap_or_default();
        Ok(Self {
            target,
            devices: args.devices.clone(),
            patch: args.patch.as_deref().map(document::parse_patch).transpose()?,
            report: args.report.as_deref().map(document::parse_patch).transpose()?,
            remove: args.remove.as_deref().map(parse_remove_target).transpose()?,
            stream: args.stream.then_some(StreamRequest {
                only_delta: args.delta,
                sync: args.sync,
            }),
        })
    }
}

/// The session this invocation needs.
pub fn session_request(args: &StateArgs) -> SessionRequest {
    SessionRequest {
        devices: args.devices.clone(),
        token: args.token.clone(),
        allow_post: args.allow_post,
        transport: TransportChoice::Rpc,
    }
}

pub async fn run<W: Write>(
    plan: &StatePlan,
    session: &Session,
    out: &mut JsonLines<W>,
) -> anyhow::Result<()> {
    if let Some(patch) = &plan.patch {
        session
            .patch(&plan.target, StateKey::Desired, patch.clone())
            .await?;
    }

    if let Some(report) = &plan.report {
        session
            .patch(&plan.target, StateKey::Reported, report.clone())
            .await?;
    }

    if let Some((key, path)) = &plan.remove {
        let shadow = session.remove(&plan.target, *key, path).await?;
        out.emit(&shadow)?;
        return Ok(());
    }

    if let Some(request) = plan.stream {
        let mut events = session.stream(request).await?;
        while let Some(item) = events.next().await {
            out.emit(&item?)?;
        }
        bail!("shadow stream ended without an error");
    }

    for shadow in session.get().await? {
        out.emit(&shadow)?;
    }
    Ok(())
}

/// Run the plan, then close the session. A failed run wins over a failed
/// close, which is only logged.
pub async fn run_and_close<W: Write>(
    plan: &StatePlan,
    session: Session,
    out: &mut JsonLines<W>,
) -> anyhow::Result<()> {
    let result = run(plan, &session, out).await;
    match session.close().await {
        Ok(()) => result,
        Err(e) if result.is_err() => {
            tracing::warn!(error = %e, "closing session after a failed run");
            result
        }
        Err(e) => Err(e.into()),
    }
}
