//! Per-stage collection access: stocks and the five (symbol, week) keyed
//! score tables, plus the weekly regime assessment.

use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::Row;

use analyzer_core::{
    AnalysisError, ConsistencyScore, LiquidityScore, MomentumScore, PositionSize,
    RegimeAssessment, StockRecord, TradeSetup,
};

use crate::db::{store_err, DocStore};

const MOMENTUM: &str = "momentum_scores";
const CONSISTENCY: &str = "consistency_scores";
const LIQUIDITY: &str = "liquidity_scores";
const SETUPS: &str = "trade_setups";
const SIZES: &str = "position_sizes";

impl DocStore {
    // ----- stocks (S1) -----

    pub async fn upsert_stock(&self, stock: &StockRecord) -> Result<(), AnalysisError> {
        let payload = serde_json::to_string(stock).map_err(store_err)?;
        sqlx::query(
            "INSERT INTO stocks (symbol, quality_score, tier, active, payload, calculated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(symbol) DO UPDATE SET
                quality_score = excluded.quality_score,
                tier = excluded.tier,
                active = excluded.active,
                payload = excluded.payload,
                calculated_at = excluded.calculated_at",
        )
        .bind(&stock.symbol)
        .bind(stock.quality_score)
        .bind(stock.tier.as_str())
        .bind(stock.active)
        .bind(payload)
        .bind(stock.calculated_at.to_rfc3339())
        .execute(self.pool())
        .await
        .map_err(store_err)?;
        Ok(())
    }

    /// Mark previously-active symbols absent from this run as inactive.
    pub async fn deactivate_missing(&self, present: &[String]) -> Result<u64, AnalysisError> {
        // SQLite has no array binds; stage a temp table of survivors.
        // Temp tables are connection-scoped, so hold one connection for
        // the whole sequence.
        let mut conn = self.pool().acquire().await.map_err(store_err)?;
        sqlx::query("CREATE TEMP TABLE IF NOT EXISTS run_symbols (symbol TEXT PRIMARY KEY)")
            .execute(&mut *conn)
            .await
            .map_err(store_err)?;
        sqlx::query("DELETE FROM run_symbols")
            .execute(&mut *conn)
            .await
            .map_err(store_err)?;
        for symbol in present {
            sqlx::query("INSERT OR IGNORE INTO run_symbols (symbol) VALUES (?1)")
                .bind(symbol)
                .execute(&mut *conn)
                .await
                .map_err(store_err)?;
        }
        let result = sqlx::query(
            "UPDATE stocks
             SET active = 0,
                 payload = json_set(payload, '$.active', json('false'))
             WHERE active = 1
               AND symbol NOT IN (SELECT symbol FROM run_symbols)",
        )
        .execute(&mut *conn)
        .await
        .map_err(store_err)?;
        Ok(result.rows_affected())
    }

    pub async fn stock(&self, symbol: &str) -> Result<Option<StockRecord>, AnalysisError> {
        let row = sqlx::query("SELECT payload FROM stocks WHERE symbol = ?1")
            .bind(symbol)
            .fetch_optional(self.pool())
            .await
            .map_err(store_err)?;
        row.map(|r| {
            serde_json::from_str::<StockRecord>(&r.get::<String, _>(0)).map_err(store_err)
        })
        .transpose()
    }

    /// Active symbols at or above the quality floor, best first.
    pub async fn active_stocks(
        &self,
        min_quality: f64,
    ) -> Result<Vec<StockRecord>, AnalysisError> {
        let rows = sqlx::query(
            "SELECT payload FROM stocks
             WHERE active = 1 AND quality_score >= ?1
             ORDER BY quality_score DESC, symbol",
        )
        .bind(min_quality)
        .fetch_all(self.pool())
        .await
        .map_err(store_err)?;
        rows.into_iter()
            .map(|r| serde_json::from_str(&r.get::<String, _>(0)).map_err(store_err))
            .collect()
    }

    // ----- generic (symbol, week) stage tables -----

    async fn upsert_stage<T: Serialize>(
        &self,
        table: &str,
        symbol: &str,
        week: NaiveDate,
        score: f64,
        qualifies: bool,
        calculated_at: DateTime<Utc>,
        record: &T,
    ) -> Result<(), AnalysisError> {
        let payload = serde_json::to_string(record).map_err(store_err)?;
        let sql = format!(
            "INSERT INTO {table} (symbol, week, score, qualifies, payload, calculated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(symbol, week) DO UPDATE SET
                score = excluded.score,
                qualifies = excluded.qualifies,
                payload = excluded.payload,
                calculated_at = excluded.calculated_at"
        );
        sqlx::query(&sql)
            .bind(symbol)
            .bind(week.to_string())
            .bind(score)
            .bind(qualifies)
            .bind(payload)
            .bind(calculated_at.to_rfc3339())
            .execute(self.pool())
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn stage_rows<T: DeserializeOwned>(
        &self,
        table: &str,
        week: NaiveDate,
        only_qualified: bool,
    ) -> Result<Vec<T>, AnalysisError> {
        let filter = if only_qualified { "AND qualifies = 1" } else { "" };
        let sql = format!(
            "SELECT payload FROM {table}
             WHERE week = ?1 {filter}
             ORDER BY score DESC, symbol"
        );
        let rows = sqlx::query(&sql)
            .bind(week.to_string())
            .fetch_all(self.pool())
            .await
            .map_err(store_err)?;
        rows.into_iter()
            .map(|r| serde_json::from_str(&r.get::<String, _>(0)).map_err(store_err))
            .collect()
    }

    async fn stage_row<T: DeserializeOwned>(
        &self,
        table: &str,
        symbol: &str,
        week: NaiveDate,
    ) -> Result<Option<T>, AnalysisError> {
        let sql = format!("SELECT payload FROM {table} WHERE symbol = ?1 AND week = ?2");
        let row = sqlx::query(&sql)
            .bind(symbol)
            .bind(week.to_string())
            .fetch_optional(self.pool())
            .await
            .map_err(store_err)?;
        row.map(|r| serde_json::from_str(&r.get::<String, _>(0)).map_err(store_err))
            .transpose()
    }

    // ----- momentum (S2) -----

    pub async fn upsert_momentum(&self, rec: &MomentumScore) -> Result<(), AnalysisError> {
        self.upsert_stage(
            MOMENTUM,
            &rec.symbol,
            rec.week,
            rec.score,
            rec.qualifies,
            rec.calculated_at,
            rec,
        )
        .await
    }

    pub async fn momentum_scores(
        &self,
        week: NaiveDate,
        only_qualified: bool,
    ) -> Result<Vec<MomentumScore>, AnalysisError> {
        self.stage_rows(MOMENTUM, week, only_qualified).await
    }

    pub async fn momentum_for(
        &self,
        symbol: &str,
        week: NaiveDate,
    ) -> Result<Option<MomentumScore>, AnalysisError> {
        self.stage_row(MOMENTUM, symbol, week).await
    }

    // ----- consistency (S3) -----

    pub async fn upsert_consistency(&self, rec: &ConsistencyScore) -> Result<(), AnalysisError> {
        self.upsert_stage(
            CONSISTENCY,
            &rec.symbol,
            rec.week,
            rec.final_score,
            rec.qualifies,
            rec.calculated_at,
            rec,
        )
        .await
    }

    pub async fn consistency_scores(
        &self,
        week: NaiveDate,
        only_qualified: bool,
    ) -> Result<Vec<ConsistencyScore>, AnalysisError> {
        self.stage_rows(CONSISTENCY, week, only_qualified).await
    }

    pub async fn consistency_for(
        &self,
        symbol: &str,
        week: NaiveDate,
    ) -> Result<Option<ConsistencyScore>, AnalysisError> {
        self.stage_row(CONSISTENCY, symbol, week).await
    }

    // ----- liquidity (S4A) -----

    pub async fn upsert_liquidity(&self, rec: &LiquidityScore) -> Result<(), AnalysisError> {
        self.upsert_stage(
            LIQUIDITY,
            &rec.symbol,
            rec.week,
            rec.score,
            rec.qualifies,
            rec.calculated_at,
            rec,
        )
        .await
    }

    pub async fn liquidity_scores(
        &self,
        week: NaiveDate,
        only_qualified: bool,
    ) -> Result<Vec<LiquidityScore>, AnalysisError> {
        self.stage_rows(LIQUIDITY, week, only_qualified).await
    }

    pub async fn liquidity_for(
        &self,
        symbol: &str,
        week: NaiveDate,
    ) -> Result<Option<LiquidityScore>, AnalysisError> {
        self.stage_row(LIQUIDITY, symbol, week).await
    }

    // ----- setups (S4B) -----

    pub async fn upsert_setup(&self, rec: &TradeSetup) -> Result<(), AnalysisError> {
        self.upsert_stage(
            SETUPS,
            &rec.symbol,
            rec.week,
            rec.quality_composite,
            true,
            rec.calculated_at,
            rec,
        )
        .await
    }

    pub async fn setups(&self, week: NaiveDate) -> Result<Vec<TradeSetup>, AnalysisError> {
        self.stage_rows(SETUPS, week, false).await
    }

    pub async fn setup_for(
        &self,
        symbol: &str,
        week: NaiveDate,
    ) -> Result<Option<TradeSetup>, AnalysisError> {
        self.stage_row(SETUPS, symbol, week).await
    }

    // ----- position sizes (S5) -----

    pub async fn upsert_position_size(&self, rec: &PositionSize) -> Result<(), AnalysisError> {
        self.upsert_stage(
            SIZES,
            &rec.symbol,
            rec.week,
            rec.quality_composite,
            rec.qualifies,
            rec.calculated_at,
            rec,
        )
        .await
    }

    pub async fn position_sizes(
        &self,
        week: NaiveDate,
        only_qualified: bool,
    ) -> Result<Vec<PositionSize>, AnalysisError> {
        self.stage_rows(SIZES, week, only_qualified).await
    }

    pub async fn position_size_for(
        &self,
        symbol: &str,
        week: NaiveDate,
    ) -> Result<Option<PositionSize>, AnalysisError> {
        self.stage_row(SIZES, symbol, week).await
    }

    // ----- regime (C5) -----

    pub async fn upsert_regime(&self, rec: &RegimeAssessment) -> Result<(), AnalysisError> {
        let payload = serde_json::to_string(rec).map_err(store_err)?;
        sqlx::query(
            "INSERT INTO regime_assessments (week, state, payload, calculated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(week) DO UPDATE SET
                state = excluded.state,
                payload = excluded.payload,
                calculated_at = excluded.calculated_at",
        )
        .bind(rec.week.to_string())
        .bind(rec.state.as_str())
        .bind(payload)
        .bind(rec.calculated_at.to_rfc3339())
        .execute(self.pool())
        .await
        .map_err(store_err)?;
        Ok(())
    }

    pub async fn regime(
        &self,
        week: NaiveDate,
    ) -> Result<Option<RegimeAssessment>, AnalysisError> {
        let row = sqlx::query("SELECT payload FROM regime_assessments WHERE week = ?1")
            .bind(week.to_string())
            .fetch_optional(self.pool())
            .await
            .map_err(store_err)?;
        row.map(|r| serde_json::from_str(&r.get::<String, _>(0)).map_err(store_err))
            .transpose()
    }
}
