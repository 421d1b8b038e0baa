// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The schema pipeline: dump on the source, restore on the target, with
//! done markers gating each section and the filtered restore list in
//! between.

use crate::listfile::{render_list, ListFilter};
use crate::tools::{run_tool, ToolError};
use pgferry_pgsql::{PgError, Session};
use pgferry_store::{Claim, CatalogStore, Paths, RunStore, RunStoreError, WorkUnit};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error(transparent)]
    Pg(#[from] PgError),
    #[error(transparent)]
    RunStore(#[from] RunStoreError),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Dump/restore sections.
pub const SECTION_PRE_DATA: &str = "pre-data";
pub const SECTION_POST_DATA: &str = "post-data";

/// Drives pg_dump / pg_restore around the catalog store.
pub struct SchemaPipeline {
    pub paths: Paths,
    pub run_store: Arc<dyn RunStore>,
    pub catalog: Arc<CatalogStore>,
    pub source_conninfo: String,
    pub target_conninfo: String,
    pub skip_extension_comments: bool,
}

impl SchemaPipeline {
    /// Dump one section of the source schema under the run snapshot.
    /// A pre-existing done marker short-circuits the dump.
    pub async fn dump_source_schema(
        &self,
        snapshot_id: Option<&str>,
        section: &str,
    ) -> Result<(), SchemaError> {
        let unit = WorkUnit::section(&format!("{section}-dump"));
        match self.run_store.claim(&unit)? {
            Claim::AlreadyDone => {
                info!(section, "dump already done, skipping");
                return Ok(());
            }
            Claim::Busy { holder } => {
                info!(section, holder, "dump held by another worker, skipping");
                return Ok(());
            }
            Claim::Acquired => {}
        }

        let out = self.paths.dump_file(section);
        let mut args = vec![
            "--format".to_string(),
            "custom".to_string(),
            "--section".to_string(),
            section.to_string(),
            "--file".to_string(),
            out.display().to_string(),
        ];
        if let Some(snapshot_id) = snapshot_id {
            args.push("--snapshot".to_string());
            args.push(snapshot_id.to_string());
        }
        args.push("--dbname".to_string());
        args.push(self.source_conninfo.clone());

        match run_tool("pg_dump", &args).await {
            Ok(_) => {
                self.run_store.mark_done(&unit)?;
                info!(section, file = %out.display(), "dumped schema section");
                Ok(())
            }
            Err(e) => {
                self.run_store.release(&unit)?;
                Err(e.into())
            }
        }
    }

    /// Produce the filtered restore list for a section and write it next
    /// to the archive.
    pub async fn write_restore_list(
        &self,
        section: &str,
        existing_schemas: &HashSet<String>,
    ) -> Result<std::path::PathBuf, SchemaError> {
        let archive = self.paths.dump_file(section);
        let listing = run_tool(
            "pg_restore",
            &["--list".to_string(), archive.display().to_string()],
        )
        .await?;

        let filter = ListFilter {
            run_store: self.run_store.as_ref(),
            catalog: self.catalog.as_ref(),
            existing_schemas,
            skip_extension_comments: self.skip_extension_comments,
        };
        let lines = filter.filter_listing(&listing.stdout);
        let rendered = render_list(&lines);

        let list_path = self.paths.filtered_list_file(section);
        std::fs::write(&list_path, rendered).map_err(|e| SchemaError::Io {
            path: list_path.display().to_string(),
            source: e,
        })?;
        info!(section, list = %list_path.display(), "wrote filtered restore list");
        Ok(list_path)
    }

    /// Restore one section on the target using the filtered list.
    async fn restore_section(&self, section: &str) -> Result<(), SchemaError> {
        let unit = WorkUnit::section(&format!("{section}-restore"));
        match self.run_store.claim(&unit)? {
            Claim::AlreadyDone => {
                info!(section, "restore already done, skipping");
                return Ok(());
            }
            Claim::Busy { holder } => {
                info!(section, holder, "restore held elsewhere, skipping");
                return Ok(());
            }
            Claim::Acquired => {}
        }

        let archive = self.paths.dump_file(section);
        let list = self.paths.filtered_list_file(section);
        let args = vec![
            "--dbname".to_string(),
            self.target_conninfo.clone(),
            "--use-list".to_string(),
            list.display().to_string(),
            "--section".to_string(),
            section.to_string(),
            archive.display().to_string(),
        ];
        match run_tool("pg_restore", &args).await {
            Ok(_) => {
                self.run_store.mark_done(&unit)?;
                info!(section, "restored schema section");
                Ok(())
            }
            Err(e) => {
                self.run_store.release(&unit)?;
                Err(e.into())
            }
        }
    }

    /// Apply copied database properties, optionally drop retained tables,
    /// then restore pre-data with the filtered list.
    pub async fn target_prepare_schema(
        &self,
        target: &Session,
        drop_if_exists: bool,
    ) -> Result<(), SchemaError> {
        self.copy_database_properties(target).await?;
        if drop_if_exists {
            self.target_drop_tables(target).await?;
        }
        let existing = self.target_schemas(target).await?;
        self.write_restore_list(SECTION_PRE_DATA, &existing).await?;
        self.restore_section(SECTION_PRE_DATA).await
    }

    /// Restore post-data minus everything the index workers already built.
    pub async fn target_finalize_schema(&self, target: &Session) -> Result<(), SchemaError> {
        let existing = self.target_schemas(target).await?;
        self.write_restore_list(SECTION_POST_DATA, &existing)
            .await?;
        self.restore_section(SECTION_POST_DATA).await
    }

    /// Replay `ALTER DATABASE / ALTER ROLE ... IN DATABASE ... SET` from
    /// the source.
    pub async fn copy_database_properties(&self, target: &Session) -> Result<(), SchemaError> {
        for statement in self.catalog.database_settings() {
            target
                .client
                .simple_query(&statement)
                .await
                .map_err(PgError::from)?;
        }
        Ok(())
    }

    /// One covering `DROP TABLE IF EXISTS a, b, ... CASCADE` for every
    /// retained table.
    pub async fn target_drop_tables(&self, target: &Session) -> Result<(), SchemaError> {
        let tables = self.catalog.tables();
        if tables.is_empty() {
            return Ok(());
        }
        let names: Vec<String> = tables.iter().map(|t| t.qname()).collect();
        let sql = format!("DROP TABLE IF EXISTS {} CASCADE", names.join(", "));
        target
            .client
            .simple_query(&sql)
            .await
            .map_err(PgError::from)?;
        info!(tables = names.len(), "dropped existing target tables");
        Ok(())
    }

    /// Schemas already present on the target.
    async fn target_schemas(&self, target: &Session) -> Result<HashSet<String>, SchemaError> {
        let rows = target
            .client
            .query(
                "SELECT n.nspname FROM pg_namespace n WHERE n.nspname NOT LIKE 'pg\\_%'",
                &[],
            )
            .await
            .map_err(PgError::from)?;
        let mut schemas = HashSet::new();
        for row in rows {
            schemas.insert(row.try_get::<_, String>(0).map_err(PgError::from)?);
        }
        Ok(schemas)
    }

    /// Copy roles with the external dump tool (optional phase).
    pub async fn copy_roles(&self) -> Result<(), SchemaError> {
        let unit = WorkUnit::section("roles");
        match self.run_store.claim(&unit)? {
            Claim::AlreadyDone | Claim::Busy { .. } => return Ok(()),
            Claim::Acquired => {}
        }
        let dump = run_tool(
            "pg_dumpall",
            &[
                "--roles-only".to_string(),
                "--no-role-passwords".to_string(),
                "--dbname".to_string(),
                self.source_conninfo.clone(),
            ],
        )
        .await?;
        let roles_path = self.paths.schema_dir().join("roles.sql");
        std::fs::write(&roles_path, &dump.stdout).map_err(|e| SchemaError::Io {
            path: roles_path.display().to_string(),
            source: e,
        })?;

        let result = run_tool(
            "psql",
            &[
                "--dbname".to_string(),
                self.target_conninfo.clone(),
                "--file".to_string(),
                roles_path.display().to_string(),
            ],
        )
        .await;
        match result {
            Ok(_) => {
                self.run_store.mark_done(&unit)?;
                Ok(())
            }
            Err(e) => {
                self.run_store.release(&unit)?;
                Err(e.into())
            }
        }
    }
}
