// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Source catalog introspection.
//!
//! Runs under the held snapshot transaction so every worker sees exactly
//! the objects enumerated here. Applies the operator's filter rules while
//! fetching: excluded objects land in the filter set (by OID and by
//! archive restore-name) instead of the retained lists.

use crate::conn::{PgError, Session};
use pgferry_core::{
    plan_column_parts, plan_ctid_parts, FilterSet, FilterSpec, IndexConstraint, Oid, SourceAttr,
    SourceIndex, SourceSequence, SourceTable, TablePart,
};
use pgferry_core::sqltext::quote_literal;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// Integer type OIDs usable as a partition key (int2, int4, int8).
const INT_TYPE_OIDS: [u32; 3] = [21, 23, 20];

/// Everything `fetchSchema` reads from the source.
#[derive(Debug, Default)]
pub struct FetchedSchema {
    pub schemas: Vec<String>,
    pub extensions: Vec<String>,
    /// `ALTER DATABASE/ROLE ... SET` statements to replay on the target.
    pub database_settings: Vec<String>,
    pub tables: Vec<SourceTable>,
    pub indexes: Vec<SourceIndex>,
    pub sequences: Vec<SourceSequence>,
    pub filter: FilterSet,
}

/// Enumerate schemas, tables, indexes, constraints, sequences, and
/// database settings; resolve the filter; plan table slices.
pub async fn fetch_schema(
    session: &Session,
    filter_spec: &FilterSpec,
    split_tables_larger_than: u64,
) -> Result<FetchedSchema, PgError> {
    let mut fetched = FetchedSchema::default();

    fetch_schemas(session, filter_spec, &mut fetched).await?;
    fetch_extensions(session, &mut fetched).await?;
    fetch_database_settings(session, &mut fetched).await?;
    fetch_tables(session, filter_spec, &mut fetched).await?;
    fetch_attributes(session, &mut fetched).await?;
    fetch_indexes(session, filter_spec, &mut fetched).await?;
    fetch_sequences(session, &mut fetched).await?;
    plan_parts(session, split_tables_larger_than, &mut fetched).await?;

    info!(
        tables = fetched.tables.len(),
        indexes = fetched.indexes.len(),
        sequences = fetched.sequences.len(),
        filtered = fetched.filter.len(),
        "fetched source schema"
    );
    Ok(fetched)
}

async fn fetch_schemas(
    session: &Session,
    filter_spec: &FilterSpec,
    fetched: &mut FetchedSchema,
) -> Result<(), PgError> {
    let rows = session
        .client
        .query(
            "SELECT n.nspname, pg_get_userbyid(n.nspowner) \
             FROM pg_namespace n \
             WHERE n.nspname NOT LIKE 'pg\\_%' \
               AND n.nspname NOT IN ('information_schema', 'pgferry') \
             ORDER BY n.nspname",
            &[],
        )
        .await?;
    for row in rows {
        let nspname: String = row.try_get(0)?;
        let owner: String = row.try_get(1)?;
        if filter_spec.excludes_schema(&nspname) {
            // SCHEMA entries carry "-" in the namespace column of the
            // archive listing.
            fetched
                .filter
                .insert_restore_name(format!("- {nspname} {owner}"));
        } else {
            fetched.schemas.push(nspname);
        }
    }
    Ok(())
}

async fn fetch_extensions(
    session: &Session,
    fetched: &mut FetchedSchema,
) -> Result<(), PgError> {
    let rows = session
        .client
        .query("SELECT extname FROM pg_extension ORDER BY extname", &[])
        .await?;
    for row in rows {
        fetched.extensions.push(row.try_get(0)?);
    }
    Ok(())
}

async fn fetch_database_settings(
    session: &Session,
    fetched: &mut FetchedSchema,
) -> Result<(), PgError> {
    let database: String = session.scalar("SELECT current_database()").await?;
    let rows = session
        .client
        .query(
            "SELECT CASE WHEN s.setrole = 0 THEN NULL ELSE pg_get_userbyid(s.setrole) END, \
                    s.setconfig \
             FROM pg_db_role_setting s \
             WHERE s.setdatabase = \
                   (SELECT d.oid FROM pg_database d WHERE d.datname = current_database())",
            &[],
        )
        .await?;
    for row in rows {
        let role: Option<String> = row.try_get(0)?;
        let configs: Option<Vec<String>> = row.try_get(1)?;
        for config in configs.unwrap_or_default() {
            let Some((name, value)) = config.split_once('=') else {
                continue;
            };
            let statement = match &role {
                Some(role) => format!(
                    "ALTER ROLE {role} IN DATABASE {database} SET {name} = {}",
                    quote_literal(value)
                ),
                None => format!(
                    "ALTER DATABASE {database} SET {name} = {}",
                    quote_literal(value)
                ),
            };
            fetched.database_settings.push(statement);
        }
    }
    Ok(())
}

async fn fetch_tables(
    session: &Session,
    filter_spec: &FilterSpec,
    fetched: &mut FetchedSchema,
) -> Result<(), PgError> {
    let rows = session
        .client
        .query(
            "SELECT c.oid, n.nspname, c.relname, c.reltuples::bigint, \
                    pg_table_size(c.oid), c.relpages::bigint, \
                    COALESCE(am.amname, 'heap'), pg_get_userbyid(c.relowner) \
             FROM pg_class c \
             JOIN pg_namespace n ON n.oid = c.relnamespace \
             LEFT JOIN pg_am am ON am.oid = c.relam \
             WHERE c.relkind = 'r' \
               AND n.nspname NOT LIKE 'pg\\_%' \
               AND n.nspname NOT IN ('information_schema', 'pgferry') \
               AND NOT EXISTS (SELECT 1 FROM pg_depend d \
                               WHERE d.objid = c.oid AND d.deptype = 'e') \
             ORDER BY pg_table_size(c.oid) DESC, c.oid",
            &[],
        )
        .await?;
    for row in rows {
        let oid: u32 = row.try_get(0)?;
        let nspname: String = row.try_get(1)?;
        let relname: String = row.try_get(2)?;
        let reltuples: i64 = row.try_get(3)?;
        let bytes: i64 = row.try_get(4)?;
        let relpages: i64 = row.try_get(5)?;
        let amname: String = row.try_get(6)?;
        let owner: String = row.try_get(7)?;

        if filter_spec.excludes_table(&nspname, &relname) {
            debug!(table = %format!("{nspname}.{relname}"), "filtered out");
            fetched.filter.insert_oid(Oid(oid));
            fetched
                .filter
                .insert_restore_name(format!("{nspname} {relname} {owner}"));
            continue;
        }
        fetched.tables.push(SourceTable {
            oid: Oid(oid),
            nspname,
            relname,
            reltuples: reltuples.max(0),
            bytes: bytes.max(0) as u64,
            relpages: relpages.max(0),
            amname,
            attrs: Vec::new(),
            parts: vec![TablePart::whole()],
        });
    }
    Ok(())
}

async fn fetch_attributes(
    session: &Session,
    fetched: &mut FetchedSchema,
) -> Result<(), PgError> {
    let oids: Vec<u32> = fetched.tables.iter().map(|t| t.oid.0).collect();
    if oids.is_empty() {
        return Ok(());
    }
    let rows = session
        .client
        .query(
            "SELECT a.attrelid, a.attnum, a.attname, a.atttypid, \
                    COALESCE(a.attnum = ANY(pk.indkey), false) \
             FROM pg_attribute a \
             LEFT JOIN pg_index pk \
                    ON pk.indrelid = a.attrelid AND pk.indisprimary \
             WHERE a.attrelid = ANY($1) AND a.attnum > 0 AND NOT a.attisdropped \
             ORDER BY a.attrelid, a.attnum",
            &[&oids],
        )
        .await?;

    let by_oid: HashMap<u32, usize> = fetched
        .tables
        .iter()
        .enumerate()
        .map(|(pos, t)| (t.oid.0, pos))
        .collect();
    for row in rows {
        let attrelid: u32 = row.try_get(0)?;
        let attnum: i16 = row.try_get(1)?;
        let name: String = row.try_get(2)?;
        let type_oid: u32 = row.try_get(3)?;
        let is_pkey: bool = row.try_get(4)?;
        if let Some(&pos) = by_oid.get(&attrelid) {
            fetched.tables[pos].attrs.push(SourceAttr {
                attnum,
                name,
                type_oid,
                is_pkey,
            });
        }
    }
    Ok(())
}

async fn fetch_indexes(
    session: &Session,
    filter_spec: &FilterSpec,
    fetched: &mut FetchedSchema,
) -> Result<(), PgError> {
    let oids: Vec<u32> = fetched.tables.iter().map(|t| t.oid.0).collect();
    if oids.is_empty() {
        return Ok(());
    }
    let rows = session
        .client
        .query(
            "SELECT i.oid, x.indrelid, ni.nspname, i.relname, \
                    pg_get_indexdef(i.oid), x.indisunique, \
                    con.oid, con.conname, pg_get_constraintdef(con.oid), \
                    con.contype::text, pg_get_userbyid(i.relowner) \
             FROM pg_index x \
             JOIN pg_class i ON i.oid = x.indexrelid \
             JOIN pg_namespace ni ON ni.oid = i.relnamespace \
             LEFT JOIN pg_constraint con \
                    ON con.conindid = x.indexrelid AND con.conrelid = x.indrelid \
             WHERE x.indrelid = ANY($1) \
             ORDER BY x.indrelid, i.oid",
            &[&oids],
        )
        .await?;
    for row in rows {
        let oid: u32 = row.try_get(0)?;
        let table_oid: u32 = row.try_get(1)?;
        let nspname: String = row.try_get(2)?;
        let relname: String = row.try_get(3)?;
        let definition: String = row.try_get(4)?;
        let is_unique: bool = row.try_get(5)?;
        let con_oid: Option<u32> = row.try_get(6)?;
        let con_name: Option<String> = row.try_get(7)?;
        let con_def: Option<String> = row.try_get(8)?;
        let con_type: Option<String> = row.try_get(9)?;
        let owner: String = row.try_get(10)?;

        if filter_spec.excludes_index(&nspname, &relname) {
            fetched.filter.insert_oid(Oid(oid));
            fetched
                .filter
                .insert_restore_name(format!("{nspname} {relname} {owner}"));
            continue;
        }

        let constraint = match (con_oid, con_name, con_def, con_type) {
            (Some(con_oid), Some(name), Some(definition), Some(contype)) => {
                Some(IndexConstraint {
                    oid: Oid(con_oid),
                    name,
                    definition,
                    is_primary: contype == "p",
                    is_unique: contype == "p" || contype == "u",
                })
            }
            _ => None,
        };
        fetched.indexes.push(SourceIndex {
            oid: Oid(oid),
            table_oid: Oid(table_oid),
            nspname,
            relname,
            definition,
            is_unique,
            constraint,
        });
    }
    Ok(())
}

async fn fetch_sequences(
    session: &Session,
    fetched: &mut FetchedSchema,
) -> Result<(), PgError> {
    let retained: HashSet<u32> = fetched.tables.iter().map(|t| t.oid.0).collect();
    let rows = session
        .client
        .query(
            "SELECT s.oid, n.nspname, s.relname, d.refobjid \
             FROM pg_class s \
             JOIN pg_namespace n ON n.oid = s.relnamespace \
             LEFT JOIN pg_depend d \
                    ON d.objid = s.oid \
                   AND d.classid = 'pg_class'::regclass \
                   AND d.refclassid = 'pg_class'::regclass \
                   AND d.deptype IN ('a', 'i') \
             WHERE s.relkind = 'S' \
               AND n.nspname NOT LIKE 'pg\\_%' \
               AND n.nspname NOT IN ('information_schema', 'pgferry') \
             ORDER BY s.oid",
            &[],
        )
        .await?;
    for row in rows {
        let oid: u32 = row.try_get(0)?;
        let nspname: String = row.try_get(1)?;
        let relname: String = row.try_get(2)?;
        let owner_table: Option<u32> = row.try_get(3)?;

        // A sequence owned by a filtered-out table goes with its table.
        if let Some(table_oid) = owner_table {
            if !retained.contains(&table_oid) && fetched.filter.contains_oid(Oid(table_oid))
            {
                fetched.filter.insert_oid(Oid(oid));
                continue;
            }
        }
        let mut sequence = SourceSequence {
            oid: Oid(oid),
            nspname,
            relname,
            owner_table: owner_table.map(Oid),
            last_value: 0,
            is_called: false,
        };
        let row = session
            .simple_query_one(&format!(
                "SELECT last_value, is_called FROM {}",
                sequence.qname()
            ))
            .await?;
        sequence.last_value = row.get(0).and_then(|s| s.parse().ok()).unwrap_or(0);
        sequence.is_called = row.get(1) == Some("t");
        fetched.sequences.push(sequence);
    }
    Ok(())
}

/// Split any table above the threshold into `ceil(size / threshold)`
/// slices, ranging over its single integer primary-key column when it has
/// one, else over physical block numbers.
async fn plan_parts(
    session: &Session,
    split_tables_larger_than: u64,
    fetched: &mut FetchedSchema,
) -> Result<(), PgError> {
    if split_tables_larger_than == 0 {
        return Ok(());
    }
    for table in &mut fetched.tables {
        if table.bytes <= split_tables_larger_than {
            continue;
        }
        let part_count = u32::try_from(
            (table.bytes + split_tables_larger_than - 1) / split_tables_larger_than,
        )
        .unwrap_or(u32::MAX)
        .max(2);

        let pkey: Vec<&SourceAttr> = table.pkey_attrs().collect();
        let split_key = match pkey.as_slice() {
            [attr] if INT_TYPE_OIDS.contains(&attr.type_oid) => Some(attr.name.clone()),
            _ => None,
        };

        table.parts = match split_key {
            Some(key) => {
                let row = session
                    .simple_query_one(&format!(
                        "SELECT min({key})::bigint, max({key})::bigint FROM {}",
                        table.qname(),
                        key = pgferry_core::sqltext::quote_ident(&key),
                    ))
                    .await?;
                let min: Option<i64> = row.get(0).and_then(|s| s.parse().ok());
                let max: Option<i64> = row.get(1).and_then(|s| s.parse().ok());
                match (min, max) {
                    (Some(min), Some(max)) if max > min => {
                        plan_column_parts(&key, min, max, part_count)
                    }
                    // Empty or single-valued key: not worth slicing.
                    _ => vec![TablePart::whole()],
                }
            }
            None => plan_ctid_parts(table.relpages, part_count),
        };
        debug!(
            table = %table.qname(),
            parts = table.parts.len(),
            "planned table slices"
        );
    }
    Ok(())
}
