//! Configuration management commands.

use crate::{AppContext, ConfigAction};

pub async fn handle(action: ConfigAction, ctx: &AppContext) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            print!("{}", ctx.config.to_toml()?);
        }
        ConfigAction::Validate => {
            let result = ctx.config.validate();

            for issue in result.errors() {
                println!("  ✗ {}: {}", issue.field, issue.message);
            }
            for issue in result.warnings() {
                println!("  ! {}: {}", issue.field, issue.message);
            }

            if !result.is_ok() {
                anyhow::bail!("configuration has {} error(s)", result.errors().len());
            }
            println!("  ✓ Configuration is valid");
        }
    }
    Ok(())
}
