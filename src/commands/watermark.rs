// ABOUTME: Watermark command - inspects and resets per-object sync progress
// ABOUTME: Resetting makes the next sync fall back to the default lookback window

use anyhow::Result;
use clap::{Args, Subcommand};

use super::CommandContext;

#[derive(Args)]
pub struct WatermarkArgs {
    #[command(subcommand)]
    command: WatermarkCommands,
}

#[derive(Subcommand)]
enum WatermarkCommands {
    /// Show the stored watermark of every object type
    List,
    /// Delete the watermark of an object type
    Reset {
        /// Object type whose watermark should be forgotten
        #[arg(long = "object")]
        object_type: String,
    },
}

pub async fn command(ctx: &CommandContext, args: WatermarkArgs) -> Result<()> {
    let store = ctx.watermark_store().await?;

    match args.command {
        WatermarkCommands::List => {
            let watermarks = store.list().await?;
            if watermarks.is_empty() {
                println!(
                    "No watermarks stored. The next sync fetches the last {} hours.",
                    ctx.config.default_lookback_hours
                );
            }
            for w in watermarks {
                println!(
                    "{:<20} last sync {}  cursor {:?}  (updated {})",
                    w.object_type,
                    w.last_sync_time.to_rfc3339(),
                    w.cursor,
                    w.updated_at.to_rfc3339()
                );
            }
        }
        WatermarkCommands::Reset { object_type } => {
            if store.reset(&object_type).await? {
                println!("Watermark for {} reset.", object_type);
            } else {
                println!("No watermark stored for {}.", object_type);
            }
        }
    }

    Ok(())
}
