// ABOUTME: Sync command - runs one incremental sync cycle for the configured object types
// ABOUTME: Prints a per-object summary and fails when any object did not complete

use anyhow::{bail, Result};

use super::CommandContext;
use crate::sync::{ObjectOutcome, RunReport, SyncEngine, SyncMode, WatermarkStatus};
use crate::utils::sanitize_url;

pub async fn sync(ctx: &CommandContext, only: &[String], mode: SyncMode) -> Result<()> {
    let objects = ctx.config.select_objects(only)?;
    let client = ctx.crm_client()?;
    let destination = ctx.destination().await?;
    let watermarks = ctx.watermark_store().await?;

    println!(
        "Syncing {} object type(s) into {}{}",
        objects.len(),
        sanitize_url(ctx.target_url()?),
        if mode == SyncMode::Full {
            " (full refresh)"
        } else {
            ""
        }
    );

    let engine = SyncEngine::new(ctx.config.clone(), client, Box::new(destination), watermarks);
    let report = engine.run(&objects, mode).await;

    print_report(&report);

    if !report.is_success() {
        bail!(
            "{} of {} object type(s) did not sync completely",
            report.failures(),
            report.objects.len()
        );
    }

    Ok(())
}

fn print_report(report: &RunReport) {
    println!();
    for object in &report.objects {
        match &object.outcome {
            Ok(ObjectOutcome::NeedsProvisioning { artifact, ddl }) => {
                println!("{}: table missing", object.object_type);
                println!("\nExecute this SQL against the target database to create the table:");
                println!("{}", ddl);
                println!("SQL has been saved to {}", artifact.display());
                println!("After creating the table, run sync again to import the data.\n");
            }
            Ok(outcome) => println!("{}: {}", object.object_type, describe(outcome)),
            Err(e) => println!("{}: failed: {:#}", object.object_type, e),
        }
    }
    println!(
        "\nCommitted {} rows in {:.1}s",
        report.rows_committed(),
        report.duration.as_secs_f64()
    );
}

fn describe(outcome: &ObjectOutcome) -> String {
    match outcome {
        ObjectOutcome::Synced {
            fetched,
            transformed,
            skipped,
            load,
            watermark,
        } => {
            let mut text = format!(
                "fetched {}, loaded {}/{} in {} batches",
                fetched, load.rows_committed, transformed, load.batches
            );
            if !skipped.is_empty() {
                text.push_str(&format!(", skipped {} invalid records", skipped.len()));
            }
            if load.has_failures() {
                text.push_str(&format!(
                    ", {} rows failed ({})",
                    load.failed_ids.len(),
                    load.failed_ids.join(", ")
                ));
            }
            text.push_str(match watermark {
                WatermarkStatus::Advanced => ", watermark advanced",
                WatermarkStatus::Held => ", watermark held",
                WatermarkStatus::Unchanged => ", later watermark already stored",
                WatermarkStatus::NotPersisted => ", watermark NOT persisted",
            });
            text
        }
        ObjectOutcome::NeedsProvisioning { artifact, .. } => {
            format!("table missing, apply {}", artifact.display())
        }
        ObjectOutcome::NoProperties => "no properties to sync".to_string(),
        ObjectOutcome::Incomplete {
            fetched,
            load,
            error,
        } => format!(
            "incomplete after {} records ({} loaded): {}{}; watermark unchanged",
            fetched,
            load.rows_committed,
            error,
            if error.is_retryable() {
                " (transient, run sync again)"
            } else {
                ""
            }
        ),
    }
}
