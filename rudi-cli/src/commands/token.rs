//! `rudi-sync token`: obtain or check the Portal access token.

use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use clap::Args;

use super::{block_on, engine, home};

/// Arguments for `rudi-sync token`.
#[derive(Args, Debug)]
pub struct TokenArgs {
    /// Ask the Portal to validate the stored token instead of renewing.
    #[arg(long)]
    pub check: bool,
}

impl TokenArgs {
    pub fn run(self) -> Result<()> {
        let home = home()?;
        let engine = engine(&home)?;

        if self.check {
            let answer = block_on(engine.check_stored_token())?
                .context("portal token check failed")?;
            println!(
                "{}",
                serde_json::to_string_pretty(&answer).context("failed to render check answer")?
            );
            return Ok(());
        }

        let token = block_on(engine.get_portal_token())?.context("could not obtain a portal token")?;
        let expires = Utc
            .timestamp_opt(token.exp, 0)
            .single()
            .map(|at| at.to_rfc3339())
            .unwrap_or_else(|| token.exp.to_string());
        println!("token valid until {expires}");
        if let Some(jti) = &token.jti {
            println!("jti: {jti}");
        }
        Ok(())
    }
}
