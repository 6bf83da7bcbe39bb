// ABOUTME: Provision command - writes (and optionally applies) CREATE TABLE scripts
// ABOUTME: The only path that creates destination tables; sync never does

use anyhow::{Context, Result};

use super::CommandContext;
use crate::config::PropertySelection;
use crate::schema::{SchemaReconciler, TableDefinition};

pub async fn provision(ctx: &CommandContext, only: &[String], apply: bool) -> Result<()> {
    let objects = ctx.config.select_objects(only)?;

    let mut definitions = Vec::with_capacity(objects.len());
    for object in &objects {
        let properties = match &object.properties {
            PropertySelection::List(properties) => properties.clone(),
            PropertySelection::All => ctx
                .crm_client()?
                .list_properties(&object.object_type)
                .await
                .with_context(|| {
                    format!("Failed to discover properties for {}", object.object_type)
                })?,
        };

        let definition = TableDefinition::derive(
            &ctx.config.destination.schema,
            &ctx.config.table_name(&object.object_type),
            &properties,
        );
        let path = definition.write_artifact(&ctx.config.provisioning_dir)?;
        println!(
            "{}: {} columns, SQL saved to {}",
            definition.name,
            definition.column_names().len(),
            path.display()
        );
        definitions.push(definition);
    }

    if !apply {
        for definition in &definitions {
            println!("\n{}", definition.create_table_sql());
        }
        println!("Re-run with --apply to create these tables in the target database.");
        return Ok(());
    }

    let destination = ctx.destination().await?;
    let reconciler = SchemaReconciler::new(&destination, &ctx.config.provisioning_dir);
    for definition in &definitions {
        if reconciler.exists(definition).await? {
            println!("{} already exists, skipping", definition.qualified_name());
            continue;
        }
        reconciler.provision(definition).await?;
        println!("Created {}", definition.qualified_name());
    }

    Ok(())
}
