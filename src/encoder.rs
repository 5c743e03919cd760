//! Report encoding
//!
//! This module stamps computed trend output with producer metadata and
//! provenance and encodes it as JSON.

use crate::error::ComputeError;
use crate::schema::FIELD_TABLE_VERSION;
use crate::types::{
    AnnotatedBucket, ClockTimeSummary, CorrelationMatrix, FieldId, ForecastResult,
    ReportProducer, ReportProvenance, TrendReport,
};
use crate::{PRODUCER_NAME, TRENDS_VERSION};
use chrono::Utc;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Computed sections of a report, before stamping
#[derive(Debug, Clone, PartialEq)]
pub struct ReportSections {
    pub primary_field: FieldId,
    pub weeks: Vec<AnnotatedBucket>,
    pub forecasts: BTreeMap<FieldId, ForecastResult>,
    pub correlation: Option<CorrelationMatrix>,
    pub clock_times: BTreeMap<FieldId, ClockTimeSummary>,
}

/// Record counts gathered while computing a report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputCounts {
    pub primary_records: usize,
    pub secondary_records: usize,
    pub days: usize,
    pub backfilled_days: usize,
}

/// Report encoder carrying a per-instance identity
pub struct ReportEncoder {
    instance_id: String,
}

impl Default for ReportEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportEncoder {
    /// Create a new encoder with a unique instance ID
    pub fn new() -> Self {
        Self {
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    /// Create an encoder with a specific instance ID
    pub fn with_instance_id(instance_id: String) -> Self {
        Self { instance_id }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Stamp computed sections into a report
    pub fn encode(&self, sections: ReportSections, counts: InputCounts) -> TrendReport {
        let producer = ReportProducer {
            name: PRODUCER_NAME.to_string(),
            version: TRENDS_VERSION.to_string(),
            instance_id: self.instance_id.clone(),
        };

        let provenance = ReportProvenance {
            computed_at_utc: Utc::now().to_rfc3339(),
            field_table_version: FIELD_TABLE_VERSION.to_string(),
            primary_records: counts.primary_records,
            secondary_records: counts.secondary_records,
            days: counts.days,
            backfilled_days: counts.backfilled_days,
        };

        TrendReport {
            producer,
            provenance,
            primary_field: sections.primary_field,
            weeks: sections.weeks,
            forecasts: sections.forecasts,
            correlation: sections.correlation,
            clock_times: sections.clock_times,
        }
    }

    /// Encode a report to a JSON string
    pub fn encode_to_json(&self, report: &TrendReport) -> Result<String, ComputeError> {
        serde_json::to_string_pretty(report).map_err(ComputeError::JsonError)
    }
}
