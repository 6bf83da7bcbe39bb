// ABOUTME: Properties command - lists the property names the source exposes for an object type
// ABOUTME: Shows the destination column each property would be flattened into

use anyhow::{Context, Result};

use super::CommandContext;
use crate::schema::TableDefinition;

pub async fn properties(ctx: &CommandContext, object_type: &str) -> Result<()> {
    let client = ctx.crm_client()?;
    let names = client
        .list_properties(object_type)
        .await
        .with_context(|| format!("Failed to list properties for {}", object_type))?;

    let definition = TableDefinition::derive(
        &ctx.config.destination.schema,
        &ctx.config.table_name(object_type),
        &names,
    );

    println!("{} properties for {}:", names.len(), object_type);
    for name in &names {
        match definition.property_columns.iter().find(|pc| &pc.property == name) {
            Some(pc) if pc.column == *name => println!("  {}", name),
            Some(pc) => println!("  {} -> {}", name, pc.column),
            None => println!("  {} (skipped: column name collision)", name),
        }
    }

    Ok(())
}
