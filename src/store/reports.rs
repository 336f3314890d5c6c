//! Report list and export templates.
//!
//! Neither is backed by a table yet: the catalogue lives in memory, starts
//! with three sample reports, and generation only flips status flags.
//! Download links are placeholders.

use chrono::{DateTime, TimeZone, Utc};
use log::info;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::cell::RefCell;

pub const GENERATED_REPORT_SIZE: &str = "2.1 MB";

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportType {
    Financial,
    Performance,
    Comparison,
    Operational,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Generating,
    Completed,
    Failed,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    Pdf,
    Excel,
    Csv,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub report_type: ReportType,
    pub status: ReportStatus,
    pub format: ReportFormat,
    #[serde(default)]
    pub size: Option<String>,
    pub generated_at: DateTime<Utc>,
    #[serde(default)]
    pub parameters: Value,
}

/// Fields a caller may choose when requesting a report; the rest is filled in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportDraft {
    pub title: Option<String>,
    pub report_type: Option<ReportType>,
    pub format: Option<ReportFormat>,
    pub parameters: Option<Value>,
}

/// `None` means "all".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportFilters {
    pub report_type: Option<ReportType>,
    pub status: Option<ReportStatus>,
}

impl ReportFilters {
    /// Parse the filter values used on the reports page (`"all"` or a lowercase name).
    pub fn parse(report_type: &str, status: &str) -> Result<Self, String> {
        Ok(ReportFilters {
            report_type: parse_filter(report_type)?,
            status: parse_filter(status)?,
        })
    }

    pub fn matches(&self, report: &Report) -> bool {
        self.report_type.is_none_or(|t| t == report.report_type) && self.status.is_none_or(|s| s == report.status)
    }
}

fn parse_filter<T: serde::de::DeserializeOwned>(raw: &str) -> Result<Option<T>, String> {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("all") {
        return Ok(None);
    }
    serde_json::from_value(Value::from(raw.to_ascii_lowercase()))
        .map(Some)
        .map_err(|_| format!("unknown filter value: {}", raw))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadLink {
    pub href: String,
    pub file_name: String,
}

fn report_id() -> String {
    format!("RPT-{}-{:04X}", Utc::now().timestamp_millis(), rand::rng().random::<u16>())
}

pub struct ReportCatalog {
    reports: RefCell<Vec<Report>>,
}

impl Default for ReportCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportCatalog {
    pub fn new() -> Self {
        ReportCatalog {
            reports: RefCell::new(sample_reports()),
        }
    }

    pub fn all(&self) -> Vec<Report> {
        self.reports.borrow().clone()
    }

    pub fn get(&self, id: &str) -> Option<Report> {
        self.reports.borrow().iter().find(|r| r.id == id).cloned()
    }

    pub fn filtered(&self, filters: &ReportFilters) -> Vec<Report> {
        self.reports.borrow().iter().filter(|r| filters.matches(r)).cloned().collect()
    }

    /// Queue a new report at the top of the list in `generating` state.
    pub fn create(&self, draft: ReportDraft) -> Report {
        let report = Report {
            id: report_id(),
            title: draft.title.unwrap_or_else(|| "Untitled Report".to_string()),
            report_type: draft.report_type.unwrap_or(ReportType::Operational),
            status: ReportStatus::Generating,
            format: draft.format.unwrap_or(ReportFormat::Pdf),
            size: None,
            generated_at: Utc::now(),
            parameters: draft.parameters.unwrap_or_else(|| json!({})),
        };
        info!("report {} queued: {}", report.id, report.title);
        self.reports.borrow_mut().insert(0, report.clone());
        report
    }

    /// Mark a generating report as done.
    pub fn finish_generation(&self, id: &str) -> Option<Report> {
        self.modify(id, |r| {
            r.status = ReportStatus::Completed;
            r.size = Some(GENERATED_REPORT_SIZE.to_string());
        })
    }

    pub fn retry(&self, id: &str) -> Option<Report> {
        self.modify(id, |r| r.status = ReportStatus::Generating)
    }

    pub fn delete(&self, id: &str) -> bool {
        let mut reports = self.reports.borrow_mut();
        let before = reports.len();
        reports.retain(|r| r.id != id);
        reports.len() != before
    }

    /// Only completed reports can be downloaded.
    pub fn download_link(&self, id: &str) -> Option<DownloadLink> {
        let report = self.get(id).filter(|r| r.status == ReportStatus::Completed)?;
        let extension = crate::utils::serde_enum_name(&report.format)?;
        Some(DownloadLink {
            href: format!("#download-{}", report.id),
            file_name: format!("{}.{}", report.title, extension),
        })
    }

    fn modify(&self, id: &str, f: impl FnOnce(&mut Report)) -> Option<Report> {
        let mut reports = self.reports.borrow_mut();
        let report = reports.iter_mut().find(|r| r.id == id)?;
        f(report);
        Some(report.clone())
    }
}

fn sample_reports() -> Vec<Report> {
    let at = |y, mo, d, h, mi| Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).single().unwrap_or_default();
    vec![
        Report {
            id: "RPT-2024-001".to_string(),
            title: "Q1 2024 Financial Summary".to_string(),
            report_type: ReportType::Financial,
            status: ReportStatus::Completed,
            format: ReportFormat::Pdf,
            size: Some("3.2 MB".to_string()),
            generated_at: at(2024, 3, 31, 14, 32),
            parameters: json!({"period": "Q1 2024", "farms": ["all"]}),
        },
        Report {
            id: "RPT-2024-002".to_string(),
            title: "Farm Performance Comparison".to_string(),
            report_type: ReportType::Performance,
            status: ReportStatus::Completed,
            format: ReportFormat::Excel,
            size: Some("1.8 MB".to_string()),
            generated_at: at(2024, 3, 30, 9, 15),
            parameters: json!({"farms": ["greenfield", "valley", "hillside"]}),
        },
        Report {
            id: "RPT-2024-003".to_string(),
            title: "Cost Analysis - March 2024".to_string(),
            report_type: ReportType::Operational,
            status: ReportStatus::Generating,
            format: ReportFormat::Pdf,
            size: None,
            generated_at: at(2024, 3, 29, 16, 45),
            parameters: json!({"period": "March 2024", "costCategories": ["feed", "labor", "healthcare"]}),
        },
    ]
}

// =====================
// Export templates
// =====================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportTemplate {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub category: &'static str,
    pub formats: &'static [&'static str],
    pub fields: &'static [&'static str],
    pub estimated_size: &'static str,
}

const EXPORT_TEMPLATES: [ExportTemplate; 6] = [
    ExportTemplate {
        id: "batch-pl",
        name: "Batch P&L Summary",
        description: "Comprehensive profit & loss analysis for selected batches",
        category: "Financial Data",
        formats: &["PDF", "Excel", "CSV"],
        fields: &["revenue", "costs", "profit", "margin", "roi", "feedCosts", "laborCosts"],
        estimated_size: "~2.5 MB",
    },
    ExportTemplate {
        id: "performance-comparison",
        name: "Farm Performance Comparison",
        description: "Side-by-side performance metrics across farms",
        category: "Performance Metrics",
        formats: &["PDF", "Excel"],
        fields: &["fcr", "mortality", "adg", "feedEfficiency", "batchPerformance"],
        estimated_size: "~1.8 MB",
    },
    ExportTemplate {
        id: "cost-breakdown",
        name: "Detailed Cost Analysis",
        description: "Granular cost breakdown by category and time period",
        category: "Financial Data",
        formats: &["Excel", "CSV"],
        fields: &["feedCosts", "laborCosts", "healthcareCosts", "utilityCosts", "overheadCosts"],
        estimated_size: "~3.2 MB",
    },
    ExportTemplate {
        id: "mortality-trends",
        name: "Mortality & Health Analysis",
        description: "Health trends and mortality patterns across batches",
        category: "Performance Metrics",
        formats: &["PDF", "Excel"],
        fields: &["mortality", "healthMetrics", "treatmentCosts", "vaccinationRecords"],
        estimated_size: "~2.1 MB",
    },
    ExportTemplate {
        id: "feed-consumption",
        name: "Feed Consumption Report",
        description: "Feed usage efficiency and consumption patterns",
        category: "Operational Data",
        formats: &["Excel", "CSV"],
        fields: &["feedConsumption", "fcr", "feedCosts", "inventoryLevels"],
        estimated_size: "~1.9 MB",
    },
    ExportTemplate {
        id: "regulatory-compliance",
        name: "Compliance Documentation",
        description: "Complete regulatory compliance and audit trail",
        category: "Compliance Reports",
        formats: &["PDF"],
        fields: &["auditTrail", "certifications", "inspectionRecords", "complianceStatus"],
        estimated_size: "~5.1 MB",
    },
];

pub fn export_templates() -> &'static [ExportTemplate] {
    &EXPORT_TEMPLATES
}

pub fn template_by_id(id: &str) -> Option<&'static ExportTemplate> {
    EXPORT_TEMPLATES.iter().find(|t| t.id == id)
}

pub fn templates_by_category(category: &str) -> Vec<&'static ExportTemplate> {
    EXPORT_TEMPLATES.iter().filter(|t| t.category == category).collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedExport {
    pub id: String,
    pub template_id: String,
    pub format: String,
    pub parameters: Value,
    pub status: ReportStatus,
    pub download_url: String,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportError {
    TemplateNotFound(String),
    UnsupportedFormat { template: String, format: String },
}

impl core::fmt::Display for ExportError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ExportError::TemplateNotFound(_) => write!(f, "Template not found"),
            ExportError::UnsupportedFormat { template, format } => {
                write!(f, "Template {} cannot be exported as {}", template, format)
            }
        }
    }
}

impl std::error::Error for ExportError {}

/// Produce a (placeholder) export of `template_id` in `format`.
pub fn generate_export(template_id: &str, format: &str, parameters: Value) -> Result<GeneratedExport, ExportError> {
    let template = template_by_id(template_id).ok_or_else(|| ExportError::TemplateNotFound(template_id.to_string()))?;
    if !template.formats.iter().any(|f| f.eq_ignore_ascii_case(format)) {
        return Err(ExportError::UnsupportedFormat {
            template: template.id.to_string(),
            format: format.to_string(),
        });
    }
    Ok(GeneratedExport {
        id: report_id(),
        template_id: template.id.to_string(),
        format: format.to_string(),
        parameters,
        status: ReportStatus::Completed,
        download_url: format!("#download-{}-{}", template.id, format.to_lowercase()),
        generated_at: Utc::now(),
    })
}
