//! Portfolio, recommendation, trade-outcome and execution collections.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use sqlx::Row;

use analyzer_core::{
    AnalysisError, FridaySummary, GapDecision, OutcomeStats, PortfolioAllocation,
    RecommendationStatus, TradeOutcome, WeeklyRecommendation,
};

use crate::db::{store_err, DocStore};

impl DocStore {
    // ----- portfolio allocations (S6) -----

    pub async fn upsert_portfolio(
        &self,
        rec: &PortfolioAllocation,
    ) -> Result<(), AnalysisError> {
        let payload = serde_json::to_string(rec).map_err(store_err)?;
        sqlx::query(
            "INSERT INTO portfolio_allocations (week, status, payload, calculated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(week) DO UPDATE SET
                status = excluded.status,
                payload = excluded.payload,
                calculated_at = excluded.calculated_at",
        )
        .bind(rec.week.to_string())
        .bind(rec.status.as_str())
        .bind(payload)
        .bind(rec.calculated_at.to_rfc3339())
        .execute(self.pool())
        .await
        .map_err(store_err)?;
        Ok(())
    }

    pub async fn portfolio(
        &self,
        week: NaiveDate,
    ) -> Result<Option<PortfolioAllocation>, AnalysisError> {
        let row = sqlx::query("SELECT payload FROM portfolio_allocations WHERE week = ?1")
            .bind(week.to_string())
            .fetch_optional(self.pool())
            .await
            .map_err(store_err)?;
        row.map(|r| serde_json::from_str(&r.get::<String, _>(0)).map_err(store_err))
            .transpose()
    }

    /// Most recent approved allocation; what the Monday execution run reads.
    pub async fn latest_approved_portfolio(
        &self,
    ) -> Result<Option<PortfolioAllocation>, AnalysisError> {
        let row = sqlx::query(
            "SELECT payload FROM portfolio_allocations
             WHERE status IN ('approved', 'executed')
             ORDER BY week DESC LIMIT 1",
        )
        .fetch_optional(self.pool())
        .await
        .map_err(store_err)?;
        row.map(|r| serde_json::from_str(&r.get::<String, _>(0)).map_err(store_err))
            .transpose()
    }

    pub async fn set_portfolio_status(
        &self,
        week: NaiveDate,
        status: RecommendationStatus,
    ) -> Result<bool, AnalysisError> {
        let result = sqlx::query(
            "UPDATE portfolio_allocations
             SET status = ?2,
                 payload = json_set(payload, '$.status', ?2)
             WHERE week = ?1",
        )
        .bind(week.to_string())
        .bind(status.as_str())
        .execute(self.pool())
        .await
        .map_err(store_err)?;
        Ok(result.rows_affected() > 0)
    }

    // ----- weekly recommendations (S8) -----

    pub async fn upsert_recommendation(
        &self,
        rec: &WeeklyRecommendation,
    ) -> Result<(), AnalysisError> {
        let payload = serde_json::to_string(rec).map_err(store_err)?;
        sqlx::query(
            "INSERT INTO recommendations (week, status, payload, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(week) DO UPDATE SET
                status = excluded.status,
                payload = excluded.payload,
                created_at = excluded.created_at",
        )
        .bind(rec.week.to_string())
        .bind(rec.status.as_str())
        .bind(payload)
        .bind(rec.created_at.to_rfc3339())
        .execute(self.pool())
        .await
        .map_err(store_err)?;
        Ok(())
    }

    pub async fn recommendation(
        &self,
        week: NaiveDate,
    ) -> Result<Option<WeeklyRecommendation>, AnalysisError> {
        let row = sqlx::query("SELECT payload FROM recommendations WHERE week = ?1")
            .bind(week.to_string())
            .fetch_optional(self.pool())
            .await
            .map_err(store_err)?;
        row.map(|r| serde_json::from_str(&r.get::<String, _>(0)).map_err(store_err))
            .transpose()
    }

    pub async fn set_recommendation_status(
        &self,
        week: NaiveDate,
        status: RecommendationStatus,
    ) -> Result<bool, AnalysisError> {
        let result = sqlx::query(
            "UPDATE recommendations
             SET status = ?2,
                 payload = json_set(payload, '$.status', ?2)
             WHERE week = ?1",
        )
        .bind(week.to_string())
        .bind(status.as_str())
        .execute(self.pool())
        .await
        .map_err(store_err)?;
        Ok(result.rows_affected() > 0)
    }

    /// Expire live recommendations created more than a week before `now`.
    pub async fn expire_stale_recommendations(
        &self,
        now: DateTime<Utc>,
    ) -> Result<u64, AnalysisError> {
        let cutoff = (now - Duration::weeks(1)).date_naive();
        let result = sqlx::query(
            "UPDATE recommendations
             SET status = 'expired',
                 payload = json_set(payload, '$.status', 'expired')
             WHERE week < ?1 AND status IN ('draft', 'approved')",
        )
        .bind(cutoff.to_string())
        .execute(self.pool())
        .await
        .map_err(store_err)?;
        Ok(result.rows_affected())
    }

    // ----- trade outcomes (S7, feeds Kelly) -----

    pub async fn upsert_outcome(&self, rec: &TradeOutcome) -> Result<(), AnalysisError> {
        let payload = serde_json::to_string(rec).map_err(store_err)?;
        sqlx::query(
            "INSERT INTO trade_outcomes
                (symbol, week, status, pnl, r_multiple, exit_date, payload, calculated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(symbol, week) DO UPDATE SET
                status = excluded.status,
                pnl = excluded.pnl,
                r_multiple = excluded.r_multiple,
                exit_date = excluded.exit_date,
                payload = excluded.payload,
                calculated_at = excluded.calculated_at",
        )
        .bind(&rec.symbol)
        .bind(rec.week.to_string())
        .bind(&rec.status)
        .bind(rec.pnl)
        .bind(rec.r_multiple)
        .bind(rec.exit_date.map(|d| d.to_string()))
        .bind(payload)
        .bind(rec.calculated_at.to_rfc3339())
        .execute(self.pool())
        .await
        .map_err(store_err)?;
        Ok(())
    }

    pub async fn outcomes_since(
        &self,
        cutoff: NaiveDate,
    ) -> Result<Vec<TradeOutcome>, AnalysisError> {
        let rows = sqlx::query(
            "SELECT payload FROM trade_outcomes
             WHERE week >= ?1
             ORDER BY week DESC",
        )
        .bind(cutoff.to_string())
        .fetch_all(self.pool())
        .await
        .map_err(store_err)?;
        rows.into_iter()
            .map(|r| serde_json::from_str(&r.get::<String, _>(0)).map_err(store_err))
            .collect()
    }

    /// Rolling Kelly inputs over the trailing 52 weeks of closed trades.
    /// Falls back to the conservative prior until 20 trades accumulate.
    pub async fn outcome_stats(&self, as_of: NaiveDate) -> Result<OutcomeStats, AnalysisError> {
        let cutoff = as_of - Duration::weeks(52);
        let closed: Vec<TradeOutcome> = self
            .outcomes_since(cutoff)
            .await?
            .into_iter()
            .filter(|o| o.status == "closed_win" || o.status == "closed_loss")
            .collect();

        if closed.len() < 20 {
            return Ok(OutcomeStats::prior());
        }

        let wins: Vec<&TradeOutcome> = closed.iter().filter(|o| o.pnl > 0.0).collect();
        let losses: Vec<&TradeOutcome> = closed.iter().filter(|o| o.pnl <= 0.0).collect();
        let win_rate = wins.len() as f64 / closed.len() as f64;
        let avg_win_r = if wins.is_empty() {
            1.2
        } else {
            wins.iter().map(|o| o.r_multiple).sum::<f64>() / wins.len() as f64
        };
        let avg_loss_r = if losses.is_empty() {
            1.1
        } else {
            (losses.iter().map(|o| o.r_multiple).sum::<f64>() / losses.len() as f64).abs()
        };

        Ok(OutcomeStats {
            win_rate,
            avg_win_r,
            avg_loss_r,
            sample_size: closed.len() as u32,
        })
    }

    // ----- execution artifacts (S7) -----

    pub async fn upsert_gap_decision(&self, rec: &GapDecision) -> Result<(), AnalysisError> {
        let payload = serde_json::to_string(rec).map_err(store_err)?;
        sqlx::query(
            "INSERT INTO gap_decisions (symbol, week, action, payload)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(symbol, week) DO UPDATE SET
                action = excluded.action,
                payload = excluded.payload",
        )
        .bind(&rec.symbol)
        .bind(rec.week.to_string())
        .bind(rec.action.as_str())
        .bind(payload)
        .execute(self.pool())
        .await
        .map_err(store_err)?;
        Ok(())
    }

    pub async fn gap_decisions(
        &self,
        week: NaiveDate,
    ) -> Result<Vec<GapDecision>, AnalysisError> {
        let rows = sqlx::query(
            "SELECT payload FROM gap_decisions WHERE week = ?1 ORDER BY symbol",
        )
        .bind(week.to_string())
        .fetch_all(self.pool())
        .await
        .map_err(store_err)?;
        rows.into_iter()
            .map(|r| serde_json::from_str(&r.get::<String, _>(0)).map_err(store_err))
            .collect()
    }

    pub async fn upsert_friday_summary(
        &self,
        rec: &FridaySummary,
    ) -> Result<(), AnalysisError> {
        let payload = serde_json::to_string(rec).map_err(store_err)?;
        sqlx::query(
            "INSERT INTO friday_summaries (week, payload, calculated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(week) DO UPDATE SET
                payload = excluded.payload,
                calculated_at = excluded.calculated_at",
        )
        .bind(rec.week.to_string())
        .bind(payload)
        .bind(rec.calculated_at.to_rfc3339())
        .execute(self.pool())
        .await
        .map_err(store_err)?;
        Ok(())
    }

    pub async fn friday_summary(
        &self,
        week: NaiveDate,
    ) -> Result<Option<FridaySummary>, AnalysisError> {
        let row = sqlx::query("SELECT payload FROM friday_summaries WHERE week = ?1")
            .bind(week.to_string())
            .fetch_optional(self.pool())
            .await
            .map_err(store_err)?;
        row.map(|r| serde_json::from_str(&r.get::<String, _>(0)).map_err(store_err))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use analyzer_core::{FunnelCounts, RegimeState};
    use chrono::TimeZone;

    fn week() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 7, 27).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 25, 12, 0, 0).unwrap()
    }

    fn empty_recommendation(week: NaiveDate) -> WeeklyRecommendation {
        WeeklyRecommendation {
            week,
            market_regime: RegimeState::RiskOff,
            regime_confidence: 0.9,
            position_multiplier: 0.0,
            total_setups: 0,
            cards: vec![],
            allocated_capital: 0.0,
            allocated_pct: 0.0,
            total_risk_pct: 0.0,
            funnel: FunnelCounts::default(),
            status: RecommendationStatus::Draft,
            fatal_reasons: vec![],
            created_at: now(),
        }
    }

    #[tokio::test]
    async fn recommendation_lifecycle() {
        let store = DocStore::in_memory().await.unwrap();
        store
            .upsert_recommendation(&empty_recommendation(week()))
            .await
            .unwrap();

        assert!(store
            .set_recommendation_status(week(), RecommendationStatus::Approved)
            .await
            .unwrap());
        let rec = store.recommendation(week()).await.unwrap().unwrap();
        assert_eq!(rec.status, RecommendationStatus::Approved);
    }

    #[tokio::test]
    async fn stale_recommendations_expire_after_a_week() {
        let store = DocStore::in_memory().await.unwrap();
        let old_week = NaiveDate::from_ymd_opt(2026, 7, 6).unwrap();
        store
            .upsert_recommendation(&empty_recommendation(old_week))
            .await
            .unwrap();
        store
            .upsert_recommendation(&empty_recommendation(week()))
            .await
            .unwrap();

        let expired = store
            .expire_stale_recommendations(Utc.with_ymd_and_hms(2026, 7, 27, 9, 0, 0).unwrap())
            .await
            .unwrap();
        assert_eq!(expired, 1);

        let old = store.recommendation(old_week).await.unwrap().unwrap();
        assert_eq!(old.status, RecommendationStatus::Expired);
        let fresh = store.recommendation(week()).await.unwrap().unwrap();
        assert_eq!(fresh.status, RecommendationStatus::Draft);
    }

    #[tokio::test]
    async fn outcome_stats_use_prior_until_twenty_trades() {
        let store = DocStore::in_memory().await.unwrap();
        for i in 0..5 {
            store
                .upsert_outcome(&TradeOutcome {
                    symbol: format!("S{i}"),
                    week: week(),
                    entry_price: 100.0,
                    stop: 95.0,
                    shares: 10,
                    exit_price: Some(110.0),
                    exit_date: Some(week()),
                    pnl: 100.0,
                    r_multiple: 2.0,
                    status: "closed_win".to_string(),
                    calculated_at: now(),
                })
                .await
                .unwrap();
        }
        let stats = store.outcome_stats(week()).await.unwrap();
        assert_eq!(stats.win_rate, 0.50);
        assert_eq!(stats.sample_size, 0);
    }

    #[tokio::test]
    async fn outcome_stats_from_history() {
        let store = DocStore::in_memory().await.unwrap();
        for i in 0..24 {
            let win = i % 2 == 0;
            store
                .upsert_outcome(&TradeOutcome {
                    symbol: format!("S{i}"),
                    week: week() - Duration::weeks(i),
                    entry_price: 100.0,
                    stop: 95.0,
                    shares: 10,
                    exit_price: Some(if win { 110.0 } else { 95.0 }),
                    exit_date: Some(week()),
                    pnl: if win { 100.0 } else { -50.0 },
                    r_multiple: if win { 2.0 } else { -1.0 },
                    status: if win { "closed_win" } else { "closed_loss" }.to_string(),
                    calculated_at: now(),
                })
                .await
                .unwrap();
        }
        let stats = store.outcome_stats(week()).await.unwrap();
        assert_eq!(stats.sample_size, 24);
        assert!((stats.win_rate - 0.5).abs() < 1e-9);
        assert!((stats.avg_win_r - 2.0).abs() < 1e-9);
        assert!((stats.avg_loss_r - 1.0).abs() < 1e-9);
    }
}
