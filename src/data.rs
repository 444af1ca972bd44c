//! Transaction aggregation into per-customer RFM metrics and feature preparation

use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::config::{AggregationConfig, FrequencyBasis};
use crate::error::{Result, RfmError};

/// A single validated purchase event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub customer_id: String,
    pub timestamp: DateTime<Utc>,
    /// Non-negative monetary amount
    pub amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
}

impl Transaction {
    pub fn new(customer_id: impl Into<String>, timestamp: DateTime<Utc>, amount: f64) -> Self {
        Self {
            customer_id: customer_id.into(),
            timestamp,
            amount,
            transaction_id: None,
        }
    }

    pub fn with_id(mut self, transaction_id: impl Into<String>) -> Self {
        self.transaction_id = Some(transaction_id.into());
        self
    }
}

/// Recency, frequency and monetary value of one customer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerMetrics {
    pub customer_id: String,
    /// Whole days between the last purchase and the reference date
    pub recency: u64,
    /// Number of purchases, always at least 1
    pub frequency: u64,
    /// Total amount spent
    pub monetary: f64,
    pub last_purchase: DateTime<Utc>,
}

impl CustomerMetrics {
    /// Raw (recency, frequency, monetary) as floats
    pub fn as_features(&self) -> [f64; 3] {
        [self.recency as f64, self.frequency as f64, self.monetary]
    }
}

/// Metrics for every customer together with the reference date used
#[derive(Debug, Clone, Serialize)]
pub struct MetricTable {
    pub reference_date: DateTime<Utc>,
    /// Sorted by customer id
    pub customers: Vec<CustomerMetrics>,
    /// Transactions dated after the reference date (recency clamped to 0)
    pub future_dated: usize,
}

impl MetricTable {
    pub fn len(&self) -> usize {
        self.customers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.customers.is_empty()
    }
}

#[derive(Default)]
struct CustomerAccumulator<'a> {
    last_purchase: Option<DateTime<Utc>>,
    transactions: u64,
    anonymous: u64,
    ids: HashSet<&'a str>,
    monetary: f64,
}

/// Reduce a transaction set to one `CustomerMetrics` per distinct customer.
///
/// The reference date defaults to the latest timestamp in the input. A
/// transaction dated after the reference date yields recency 0 and a warning.
pub fn aggregate_metrics(
    transactions: &[Transaction],
    config: &AggregationConfig,
) -> Result<MetricTable> {
    if transactions.is_empty() {
        return Err(RfmError::EmptyInput {
            stage: "transactions",
        });
    }

    let mut by_customer: BTreeMap<&str, CustomerAccumulator> = BTreeMap::new();
    for (index, txn) in transactions.iter().enumerate() {
        validate_transaction(index, txn)?;

        let acc = by_customer.entry(txn.customer_id.as_str()).or_default();
        acc.transactions += 1;
        acc.monetary += txn.amount;
        acc.last_purchase = Some(match acc.last_purchase {
            Some(last) if last >= txn.timestamp => last,
            _ => txn.timestamp,
        });
        match txn.transaction_id.as_deref() {
            Some(id) => {
                acc.ids.insert(id);
            }
            None => acc.anonymous += 1,
        }
    }

    let reference_date = match config.reference_date {
        Some(date) => date,
        None => transactions
            .iter()
            .map(|t| t.timestamp)
            .max()
            .ok_or(RfmError::EmptyInput {
                stage: "transactions",
            })?,
    };

    let future_dated = transactions
        .iter()
        .filter(|t| t.timestamp > reference_date)
        .count();
    if future_dated > 0 {
        log::warn!(
            "{future_dated} transactions are dated after the reference date {reference_date}; recency clamped to 0"
        );
    }

    let mut customers = Vec::with_capacity(by_customer.len());
    for (customer_id, acc) in by_customer {
        let Some(last_purchase) = acc.last_purchase else {
            continue;
        };
        let elapsed_days = (reference_date - last_purchase).num_days();
        let frequency = match config.frequency_basis {
            FrequencyBasis::Transactions => acc.transactions,
            FrequencyBasis::DistinctTransactionIds => acc.ids.len() as u64 + acc.anonymous,
        };
        customers.push(CustomerMetrics {
            customer_id: customer_id.to_string(),
            recency: elapsed_days.max(0) as u64,
            frequency,
            monetary: acc.monetary,
            last_purchase,
        });
    }

    log::info!(
        "Aggregated {} transactions into {} customers (reference date {})",
        transactions.len(),
        customers.len(),
        reference_date.format("%Y-%m-%d")
    );

    Ok(MetricTable {
        reference_date,
        customers,
        future_dated,
    })
}

fn validate_transaction(index: usize, txn: &Transaction) -> Result<()> {
    let reason = if txn.customer_id.trim().is_empty() {
        Some("customer id is empty".to_string())
    } else if !txn.amount.is_finite() {
        Some(format!("amount {} is not finite", txn.amount))
    } else if txn.amount < 0.0 {
        Some(format!("amount {} is negative", txn.amount))
    } else {
        None
    };

    match reason {
        Some(reason) => Err(RfmError::InvalidTransaction {
            index,
            customer_id: txn.customer_id.clone(),
            reason,
        }),
        None => Ok(()),
    }
}

/// Descriptive statistics over the raw transaction set
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionSummary {
    pub total_transactions: usize,
    pub unique_customers: usize,
    pub first_transaction: DateTime<Utc>,
    pub last_transaction: DateTime<Utc>,
    pub span_days: i64,
    pub total_revenue: f64,
    pub mean_transaction: f64,
    pub median_transaction: f64,
    pub min_transaction: f64,
    pub max_transaction: f64,
    pub transactions_per_customer: f64,
    pub revenue_per_customer: f64,
}

impl TransactionSummary {
    pub fn from_transactions(transactions: &[Transaction]) -> Result<Self> {
        let (first, last) = match (
            transactions.iter().map(|t| t.timestamp).min(),
            transactions.iter().map(|t| t.timestamp).max(),
        ) {
            (Some(first), Some(last)) => (first, last),
            _ => {
                return Err(RfmError::EmptyInput {
                    stage: "transactions",
                })
            }
        };

        let mut amounts: Vec<f64> = transactions.iter().map(|t| t.amount).collect();
        amounts.sort_by(f64::total_cmp);

        let n = amounts.len();
        let total_revenue: f64 = amounts.iter().sum();
        let median_transaction = if n % 2 == 1 {
            amounts[n / 2]
        } else {
            (amounts[n / 2 - 1] + amounts[n / 2]) / 2.0
        };
        let unique_customers = transactions
            .iter()
            .map(|t| t.customer_id.as_str())
            .collect::<HashSet<_>>()
            .len();

        Ok(Self {
            total_transactions: n,
            unique_customers,
            first_transaction: first,
            last_transaction: last,
            span_days: (last - first).num_days(),
            total_revenue,
            mean_transaction: total_revenue / n as f64,
            median_transaction,
            min_transaction: amounts[0],
            max_transaction: amounts[n - 1],
            transactions_per_customer: n as f64 / unique_customers as f64,
            revenue_per_customer: total_revenue / unique_customers as f64,
        })
    }
}

/// Zero-mean, unit-variance column scaling.
///
/// Columns with zero variance are only centred.
#[derive(Debug, Clone, PartialEq)]
pub struct StandardScaler {
    pub mean: Array1<f64>,
    pub std: Array1<f64>,
}

impl StandardScaler {
    pub fn fit(data: &Array2<f64>) -> Self {
        let mean = data
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(data.ncols()));
        let std = if data.nrows() == 0 {
            Array1::ones(data.ncols())
        } else {
            data.std_axis(Axis(0), 0.0)
                .mapv(|s| if s > f64::EPSILON { s } else { 1.0 })
        };
        Self { mean, std }
    }

    pub fn transform(&self, mut data: Array2<f64>) -> Array2<f64> {
        for mut row in data.outer_iter_mut() {
            row -= &self.mean;
            row /= &self.std;
        }
        data
    }
}

/// Clustering input: scaled feature matrix aligned with customer ids
#[derive(Debug, Clone)]
pub struct RfmData {
    /// Scaled features (n_customers, 3)
    pub features: Array2<f64>,
    pub customer_ids: Vec<String>,
    pub scaler: StandardScaler,
    /// Recency, frequency, monetary before any transform
    pub raw_features: Array2<f64>,
    /// Whether ln(1 + x) was applied to frequency and monetary before scaling
    pub log_transform: bool,
}

impl RfmData {
    pub fn from_metrics(metrics: &[CustomerMetrics], log_transform: bool) -> Result<Self> {
        if metrics.is_empty() {
            return Err(RfmError::EmptyInput { stage: "customers" });
        }

        let n_samples = metrics.len();
        let mut raw_features = Array2::zeros((n_samples, 3));
        for (mut row, m) in raw_features.outer_iter_mut().zip(metrics) {
            row.assign(&Array1::from(m.as_features().to_vec()));
        }

        let transformed = transform_raw(raw_features.clone(), log_transform);
        let scaler = StandardScaler::fit(&transformed);
        let features = scaler.transform(transformed);

        Ok(Self {
            features,
            customer_ids: metrics.iter().map(|m| m.customer_id.clone()).collect(),
            scaler,
            raw_features,
            log_transform,
        })
    }

    pub fn len(&self) -> usize {
        self.customer_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.customer_ids.is_empty()
    }

    /// Number of distinct (recency, frequency, monetary) rows
    pub fn distinct_points(&self) -> usize {
        self.raw_features
            .outer_iter()
            .map(|row| [row[0].to_bits(), row[1].to_bits(), row[2].to_bits()])
            .collect::<HashSet<_>>()
            .len()
    }

    /// Scale new raw RFM values with the fitted transform
    pub fn scale_new_data(&self, rfm: &[f64; 3]) -> Result<Array1<f64>> {
        if rfm.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(RfmError::config(
                "predict",
                format!("RFM values must be finite and non-negative, got {rfm:?}"),
            ));
        }
        let input = Array2::from_shape_vec((1, 3), rfm.to_vec())
            .map_err(|e| RfmError::config("predict", e.to_string()))?;
        let scaled = self
            .scaler
            .transform(transform_raw(input, self.log_transform));
        Ok(scaled.row(0).to_owned())
    }
}

fn transform_raw(mut data: Array2<f64>, log_transform: bool) -> Array2<f64> {
    if log_transform {
        data.column_mut(1).mapv_inplace(f64::ln_1p);
        data.column_mut(2).mapv_inplace(f64::ln_1p);
    }
    data
}
