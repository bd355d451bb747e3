use crate::extract::category_display_name;
use crate::models::DashboardStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityLevel {
    Beginner,
    Active,
    Pro,
    Expert,
    Master,
}

impl ActivityLevel {
    pub fn for_count(count: u64) -> Self {
        match count {
            0..=10 => Self::Beginner,
            11..=30 => Self::Active,
            31..=60 => Self::Pro,
            61..=100 => Self::Expert,
            _ => Self::Master,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Beginner => "Beginner",
            Self::Active => "Active",
            Self::Pro => "Pro",
            Self::Expert => "Expert",
            Self::Master => "Master",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CategoryRow {
    pub category: String,
    pub display_name: String,
    pub count: u64,
    pub percentage: u64,
    pub level: ActivityLevel,
}

/// One row per category, busiest first.
pub fn category_rows(stats: &DashboardStats) -> Vec<CategoryRow> {
    let mut rows: Vec<CategoryRow> = stats
        .category_distribution
        .iter()
        .map(|(category, &count)| CategoryRow {
            category: category.clone(),
            display_name: category_display_name(category),
            count,
            percentage: percentage(count, stats.total_emails),
            level: ActivityLevel::for_count(count),
        })
        .collect();

    rows.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.category.cmp(&b.category)));
    rows
}

fn percentage(count: u64, total: u64) -> u64 {
    if total == 0 {
        return 0;
    }
    ((count as f64 / total as f64) * 100.0).round() as u64
}
