use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::Serialize;
use std::collections::HashMap;

use crate::data::{DashboardFilter, Dataset, Kpis, StudentRow};

/// How many groups the parental qualification charts keep.
const TOP_GROUPS: usize = 10;

pub const NO_MATCH_WARNING: &str = "No data matches your filters.";

type NumericColumn = fn(&StudentRow) -> Option<f64>;
type CategoricalColumn = fn(&StudentRow) -> Option<&str>;

const CORRELATION_COLUMNS: [(&str, NumericColumn); 6] = [
    ("Is_Dropout", dropout_flag),
    ("Age at Enrollment", age),
    ("Average Grade (2nd Sem)", grade_2nd_sem),
    ("Unemployment Rate (%)", unemployment_rate),
    ("Tuition Fees Up-to-Date", tuition_up_to_date),
    ("Scholarship Holder", scholarship_holder),
];

fn dropout_flag(row: &StudentRow) -> Option<f64> {
    Some(if row.is_dropout() { 1.0 } else { 0.0 })
}

fn age(row: &StudentRow) -> Option<f64> {
    row.age
}

fn grade_2nd_sem(row: &StudentRow) -> Option<f64> {
    row.grade_2nd_sem
}

fn unemployment_rate(row: &StudentRow) -> Option<f64> {
    row.unemployment_rate
}

fn tuition_up_to_date(row: &StudentRow) -> Option<f64> {
    row.tuition_up_to_date
}

fn scholarship_holder(row: &StudentRow) -> Option<f64> {
    row.scholarship_holder
}

fn father_qualification(row: &StudentRow) -> Option<&str> {
    row.father_qualification.as_deref()
}

fn mother_qualification(row: &StudentRow) -> Option<&str> {
    row.mother_qualification.as_deref()
}

/// Fraction of rows whose status is "Dropout"; 0 for no rows.
pub fn dropout_rate<'a>(rows: impl IntoIterator<Item = &'a StudentRow>) -> f64 {
    let (total, dropouts) = rows.into_iter().fold((0usize, 0usize), |(t, d), row| {
        (t + 1, d + usize::from(row.is_dropout()))
    });
    if total == 0 {
        0.0
    } else {
        dropouts as f64 / total as f64
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GroupRate {
    pub group: String,
    pub dropout_rate: f64,
    pub students: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TrendPoint {
    pub x: f64,
    pub dropout_rate: f64,
    pub students: usize,
}

/// Least-squares line through a trend scatter.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct LinearTrend {
    pub slope: f64,
    pub intercept: f64,
}

impl LinearTrend {
    pub fn at(&self, x: f64) -> f64 {
        self.intercept + self.slope * x
    }
}

/// Dropout rate per categorical value, highest first, top ten.
pub fn dropout_by(rows: &[&StudentRow], key: CategoricalColumn) -> Vec<GroupRate> {
    let mut groups: HashMap<&str, (usize, usize)> = HashMap::new();
    for row in rows {
        if let Some(k) = key(row) {
            let entry = groups.entry(k).or_default();
            entry.0 += 1;
            entry.1 += usize::from(row.is_dropout());
        }
    }

    let mut rates: Vec<GroupRate> = groups
        .into_iter()
        .map(|(group, (students, dropouts))| GroupRate {
            group: group.to_string(),
            dropout_rate: dropouts as f64 / students as f64,
            students,
        })
        .collect();
    rates.sort_by(|a, b| {
        b.dropout_rate
            .total_cmp(&a.dropout_rate)
            .then_with(|| a.group.cmp(&b.group))
    });
    rates.truncate(TOP_GROUPS);
    rates
}

/// Dropout rate per numeric value, ordered by that value.
pub fn trend_by(rows: &[&StudentRow], key: NumericColumn) -> Vec<TrendPoint> {
    let mut groups: HashMap<u64, (f64, usize, usize)> = HashMap::new();
    for row in rows {
        if let Some(x) = key(row).filter(|x| !x.is_nan()) {
            // Fold -0.0 into 0.0 so both land in one bucket.
            let x = x + 0.0;
            let entry = groups.entry(x.to_bits()).or_insert((x, 0, 0));
            entry.1 += 1;
            entry.2 += usize::from(row.is_dropout());
        }
    }

    let mut points: Vec<TrendPoint> = groups
        .into_values()
        .map(|(x, students, dropouts)| TrendPoint {
            x,
            dropout_rate: dropouts as f64 / students as f64,
            students,
        })
        .collect();
    points.sort_by(|a, b| a.x.total_cmp(&b.x));
    points
}

/// Ordinary least squares over the points; `None` with fewer than two
/// distinct x values.
pub fn linear_trend(points: &[TrendPoint]) -> Option<LinearTrend> {
    if points.len() < 2 {
        return None;
    }
    let xs = Array1::from_iter(points.iter().map(|p| p.x));
    let ys = Array1::from_iter(points.iter().map(|p| p.dropout_rate));
    let (mx, my) = (xs.mean()?, ys.mean()?);
    let dx = &xs - mx;
    let dy = &ys - my;

    let sxx = dx.dot(&dx);
    if sxx == 0.0 {
        return None;
    }
    let slope = dx.dot(&dy) / sxx;
    Some(LinearTrend {
        slope,
        intercept: my - slope * mx,
    })
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CorrelationMatrix {
    pub columns: Vec<String>,
    /// Row-major coefficients; `None` where a column has no variance.
    pub values: Vec<Vec<Option<f64>>>,
}

impl CorrelationMatrix {
    pub fn get(&self, a: &str, b: &str) -> Option<f64> {
        let i = self.columns.iter().position(|c| c == a)?;
        let j = self.columns.iter().position(|c| c == b)?;
        self.values[i][j]
    }
}

/// Pearson correlation between the dropout flag and the numeric columns
/// present in `rows`, using pairwise-complete observations.
pub fn correlation_matrix(rows: &[&StudentRow]) -> CorrelationMatrix {
    let present: Vec<(&str, NumericColumn)> = CORRELATION_COLUMNS
        .iter()
        .copied()
        .filter(|(_, column)| rows.iter().any(|r| column(*r).is_some()))
        .collect();

    let mut table = Array2::<f64>::from_elem((rows.len(), present.len()), f64::NAN);
    for (i, row) in rows.iter().enumerate() {
        for (j, (_, column)) in present.iter().enumerate() {
            if let Some(v) = column(*row) {
                table[[i, j]] = v;
            }
        }
    }

    let n = present.len();
    let mut values = vec![vec![None; n]; n];
    for a in 0..n {
        for b in a..n {
            let r = pearson(table.index_axis(Axis(1), a), table.index_axis(Axis(1), b));
            values[a][b] = r;
            values[b][a] = r;
        }
    }

    CorrelationMatrix {
        columns: present.iter().map(|(name, _)| name.to_string()).collect(),
        values,
    }
}

fn pearson(a: ArrayView1<f64>, b: ArrayView1<f64>) -> Option<f64> {
    let (xs, ys): (Vec<f64>, Vec<f64>) = a
        .iter()
        .zip(b.iter())
        .filter(|(x, y)| !x.is_nan() && !y.is_nan())
        .map(|(x, y)| (*x, *y))
        .unzip();
    if xs.len() < 2 {
        return None;
    }

    let xs = Array1::from_vec(xs);
    let ys = Array1::from_vec(ys);
    let dx = &xs - xs.mean()?;
    let dy = &ys - ys.mean()?;

    let (sxx, syy) = (dx.dot(&dx), dy.dot(&dy));
    if sxx == 0.0 || syy == 0.0 {
        return None;
    }
    Some((dx.dot(&dy) / (sxx * syy).sqrt()).clamp(-1.0, 1.0))
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardCharts {
    pub kpis: Kpis,
    pub correlation: CorrelationMatrix,
    pub father_qualification: Vec<GroupRate>,
    pub mother_qualification: Vec<GroupRate>,
    pub age_trend: Vec<TrendPoint>,
    pub economic_trend: Vec<TrendPoint>,
    pub economic_trendline: Option<LinearTrend>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DashboardView {
    Empty { warning: &'static str },
    Ready(Box<DashboardCharts>),
}

impl DashboardView {
    pub fn build(dataset: &Dataset, filter: &DashboardFilter) -> Self {
        let rows = dataset.filter(filter);
        if rows.is_empty() {
            return DashboardView::Empty {
                warning: NO_MATCH_WARNING,
            };
        }

        let economic_trend = trend_by(&rows, unemployment_rate);
        DashboardView::Ready(Box::new(DashboardCharts {
            kpis: Kpis::compute(&rows),
            correlation: correlation_matrix(&rows),
            father_qualification: dropout_by(&rows, father_qualification),
            mother_qualification: dropout_by(&rows, mother_qualification),
            age_trend: trend_by(&rows, age),
            economic_trendline: linear_trend(&economic_trend),
            economic_trend,
        }))
    }
}
