use anyhow::{bail, Result};

use super::Session;
use crate::ui;
use crate::Context;

pub fn run(ctx: &Context, name: &str) -> Result<()> {
    let session = Session::open()?;
    if session.state.get(name).is_none() {
        bail!("{name} is not installed");
    }

    match session.engine.test(name)? {
        Some(record) => {
            if !ctx.quiet {
                ui::success(&format!("{name}: {} passed", record.command));
            }
        }
        None => ui::warn(&format!("{name} declares no test")),
    }
    Ok(())
}
