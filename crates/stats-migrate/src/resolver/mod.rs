//! Legacy-id to relational-key resolution.
//!
//! The relational store owns the canonical primary keys; source documents
//! only carry legacy string identifiers. A run preloads all current
//! mappings in four bulk queries, then falls back to a point query for
//! references created after preload. Mission client ids are only unique
//! per owning partner, so missions key on a (client_id, partner legacy id)
//! composite.

use crate::error::Result;
use deadpool_postgres::Pool;
use std::collections::HashMap;
use tracing::{info, warn};

/// Per-run reference cache with point-query fallback.
///
/// Resolution misses are never fatal: they are logged with the source
/// record id so the reference can be backfilled manually later.
pub struct ReferenceResolver {
    pool: Option<Pool>,
    partners: HashMap<String, i64>,
    missions: HashMap<(String, String), i64>,
    campaigns: HashMap<String, i64>,
    widgets: HashMap<String, i64>,
}

impl ReferenceResolver {
    /// Resolver backed by the relational store.
    pub fn new(pool: Pool) -> Self {
        Self {
            pool: Some(pool),
            partners: HashMap::new(),
            missions: HashMap::new(),
            campaigns: HashMap::new(),
            widgets: HashMap::new(),
        }
    }

    /// Resolver serving only what is seeded into the cache; point-query
    /// fallback is disabled. Used where no store connection exists.
    pub fn detached() -> Self {
        Self {
            pool: None,
            partners: HashMap::new(),
            missions: HashMap::new(),
            campaigns: HashMap::new(),
            widgets: HashMap::new(),
        }
    }

    /// Seed a partner mapping.
    pub fn insert_partner(&mut self, legacy_id: impl Into<String>, id: i64) {
        self.partners.insert(legacy_id.into(), id);
    }

    /// Seed a mission mapping keyed by (client id, owning partner legacy id).
    pub fn insert_mission(
        &mut self,
        client_id: impl Into<String>,
        partner_legacy_id: impl Into<String>,
        id: i64,
    ) {
        self.missions
            .insert((client_id.into(), partner_legacy_id.into()), id);
    }

    /// Seed a campaign mapping.
    pub fn insert_campaign(&mut self, legacy_id: impl Into<String>, id: i64) {
        self.campaigns.insert(legacy_id.into(), id);
    }

    /// Seed a widget mapping.
    pub fn insert_widget(&mut self, legacy_id: impl Into<String>, id: i64) {
        self.widgets.insert(legacy_id.into(), id);
    }

    /// Bulk-load every current mapping from the relational store.
    pub async fn preload(&mut self) -> Result<()> {
        let Some(pool) = self.pool.clone() else {
            return Ok(());
        };
        let conn = pool.get().await?;

        for row in conn
            .query("SELECT old_id, id FROM partners WHERE old_id IS NOT NULL", &[])
            .await?
        {
            self.partners.insert(row.get(0), row.get(1));
        }

        for row in conn
            .query(
                "SELECT m.client_id, p.old_id, m.id
                 FROM missions m
                 JOIN partners p ON p.id = m.partner_id
                 WHERE m.client_id IS NOT NULL AND p.old_id IS NOT NULL",
                &[],
            )
            .await?
        {
            self.missions
                .insert((row.get(0), row.get(1)), row.get(2));
        }

        for row in conn
            .query("SELECT old_id, id FROM campaigns WHERE old_id IS NOT NULL", &[])
            .await?
        {
            self.campaigns.insert(row.get(0), row.get(1));
        }

        for row in conn
            .query("SELECT old_id, id FROM widgets WHERE old_id IS NOT NULL", &[])
            .await?
        {
            self.widgets.insert(row.get(0), row.get(1));
        }

        info!(
            "Preloaded references: {} partners, {} missions, {} campaigns, {} widgets",
            self.partners.len(),
            self.missions.len(),
            self.campaigns.len(),
            self.widgets.len()
        );
        Ok(())
    }

    /// Resolve a partner legacy id.
    pub async fn resolve_partner(&mut self, legacy_id: &str) -> Result<Option<i64>> {
        if let Some(&id) = self.partners.get(legacy_id) {
            return Ok(Some(id));
        }

        let Some(pool) = self.pool.clone() else {
            return Ok(None);
        };
        let conn = pool.get().await?;
        let row = conn
            .query_opt("SELECT id FROM partners WHERE old_id = $1", &[&legacy_id])
            .await?;

        match row {
            Some(r) => {
                let id: i64 = r.get(0);
                self.partners.insert(legacy_id.to_string(), id);
                Ok(Some(id))
            }
            None => Ok(None),
        }
    }

    /// Resolve a mission by (client id, owning partner legacy id).
    pub async fn resolve_mission(
        &mut self,
        client_id: &str,
        partner_legacy_id: &str,
        record_id: &str,
    ) -> Result<Option<i64>> {
        let key = (client_id.to_string(), partner_legacy_id.to_string());
        if let Some(&id) = self.missions.get(&key) {
            return Ok(Some(id));
        }

        if let Some(pool) = self.pool.clone() {
            let conn = pool.get().await?;
            let row = conn
                .query_opt(
                    "SELECT m.id
                     FROM missions m
                     JOIN partners p ON p.id = m.partner_id
                     WHERE m.client_id = $1 AND p.old_id = $2",
                    &[&client_id, &partner_legacy_id],
                )
                .await?;

            if let Some(r) = row {
                let id: i64 = r.get(0);
                self.missions.insert(key, id);
                return Ok(Some(id));
            }
        }

        warn!(
            "Unresolved mission reference (record {}): client_id={} partner={}",
            record_id, client_id, partner_legacy_id
        );
        Ok(None)
    }

    /// Resolve a campaign legacy id.
    pub async fn resolve_campaign(
        &mut self,
        legacy_id: &str,
        record_id: &str,
    ) -> Result<Option<i64>> {
        if let Some(&id) = self.campaigns.get(legacy_id) {
            return Ok(Some(id));
        }

        if let Some(pool) = self.pool.clone() {
            let conn = pool.get().await?;
            let row = conn
                .query_opt("SELECT id FROM campaigns WHERE old_id = $1", &[&legacy_id])
                .await?;
            if let Some(r) = row {
                let id: i64 = r.get(0);
                self.campaigns.insert(legacy_id.to_string(), id);
                return Ok(Some(id));
            }
        }

        warn!(
            "Unresolved campaign reference (record {}): {}",
            record_id, legacy_id
        );
        Ok(None)
    }

    /// Resolve a widget legacy id.
    pub async fn resolve_widget(
        &mut self,
        legacy_id: &str,
        record_id: &str,
    ) -> Result<Option<i64>> {
        if let Some(&id) = self.widgets.get(legacy_id) {
            return Ok(Some(id));
        }

        if let Some(pool) = self.pool.clone() {
            let conn = pool.get().await?;
            let row = conn
                .query_opt("SELECT id FROM widgets WHERE old_id = $1", &[&legacy_id])
                .await?;
            if let Some(r) = row {
                let id: i64 = r.get(0);
                self.widgets.insert(legacy_id.to_string(), id);
                return Ok(Some(id));
            }
        }

        warn!(
            "Unresolved widget reference (record {}): {}",
            record_id, legacy_id
        );
        Ok(None)
    }
}
