//! `dshadow token`: issue a device-scoped token and print it.

use std::io::Write;

use ds_protocol::{AccessLevel, TokenResponse};
use ds_shadow_client::TokenIssuer;

use crate::cli::TokenArgs;
use crate::output::JsonLines;

pub async fn run<I: TokenIssuer, W: Write>(
    args: &TokenArgs,
    issuer: &I,
    out: &mut JsonLines<W>,
) -> anyhow::Result<()> {
    let level = if args.allow_post {
        AccessLevel::Mgmt
    } else {
        AccessLevel::None
    };
    let token = issuer.issue(&args.devices, level).await?;
    out.emit(&TokenResponse {
        token: token.into_string(),
    })
}
