//! Keyed field extraction between two layers

use crate::store::Workspace;
use anyhow::{Context, Result};
use rusqlite::types::Value;
use std::collections::HashMap;

/// Copy `fields` from `join_layer` onto every row of `input_layer` whose
/// `input_key` matches a `join_key` value. Returns the number of updated rows.
///
/// Keys are compared by their text form. When the join layer repeats a key,
/// its last row wins. Rows with no match, or a NULL key, are left untouched.
pub fn extract_fields(
    workspace: &Workspace,
    input_layer: &str,
    input_key: &str,
    join_layer: &str,
    join_key: &str,
    fields: &[String],
) -> Result<usize> {
    if fields.is_empty() {
        anyhow::bail!("no fields to extract");
    }

    let join: HashMap<String, Vec<Value>> = workspace
        .read_fields(join_layer, join_key, fields)
        .with_context(|| format!("failed to read join layer {}", join_layer))?
        .into_iter()
        .filter_map(|(_, key, values)| key.map(|k| (k, values)))
        .collect();

    let targets = workspace
        .read_fields(input_layer, input_key, &[])
        .with_context(|| format!("failed to read input layer {}", input_layer))?;

    let mut updated = 0;
    for (row_id, key, _) in targets {
        let Some(values) = key.as_ref().and_then(|k| join.get(k)) else {
            continue;
        };
        workspace.write_fields(input_layer, row_id, fields, values)?;
        updated += 1;
    }

    tracing::info!(
        input_layer,
        join_layer,
        updated,
        "{} data extraction successful",
        input_layer
    );
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace() -> Workspace {
        let ws = Workspace::open_in_memory().unwrap();
        ws.connection()
            .execute_batch(
                r#"
                CREATE TABLE "Bridges" ("StructureId" TEXT, "Frag_no" TEXT, "Year" INTEGER);
                INSERT INTO "Bridges" VALUES ('B1', NULL, NULL);
                INSERT INTO "Bridges" VALUES ('B2', 'old', 1950);
                INSERT INTO "Bridges" VALUES ('B3', NULL, NULL);
                CREATE TABLE "Inventory" ("Id" TEXT, "Frag_no" TEXT, "Year" INTEGER);
                INSERT INTO "Inventory" VALUES ('B1', 'F1', 1970);
                INSERT INTO "Inventory" VALUES ('B2', 'F2', 1985);
                INSERT INTO "Inventory" VALUES ('B2', 'F3', 1990);
                INSERT INTO "Inventory" VALUES ('B9', 'F9', 2001);
                "#,
            )
            .unwrap();
        ws
    }

    fn fields() -> Vec<String> {
        vec!["Frag_no".to_string(), "Year".to_string()]
    }

    #[test]
    fn test_only_matching_rows_are_updated() {
        let ws = workspace();
        let updated =
            extract_fields(&ws, "Bridges", "StructureId", "Inventory", "Id", &fields()).unwrap();
        assert_eq!(updated, 2);

        let rows: Vec<(String, Option<String>, Option<i64>)> = ws
            .connection()
            .prepare(r#"SELECT "StructureId", "Frag_no", "Year" FROM "Bridges" ORDER BY rowid"#)
            .unwrap()
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        assert_eq!(rows[0], ("B1".to_string(), Some("F1".to_string()), Some(1970)));
        // repeated join key: last row wins
        assert_eq!(rows[1], ("B2".to_string(), Some("F3".to_string()), Some(1990)));
        assert_eq!(rows[2], ("B3".to_string(), None, None));
    }

    #[test]
    fn test_unknown_field_is_an_error() {
        let ws = workspace();
        let bad = vec!["Nope".to_string()];
        assert!(extract_fields(&ws, "Bridges", "StructureId", "Inventory", "Id", &bad).is_err());
        assert!(extract_fields(&ws, "Bridges", "StructureId", "Inventory", "Id", &[]).is_err());
    }
}
