use crate::dispatch::{ArchiveStatus, RunSummary};
use crate::indicators::{BbStatus, Trend};
use crate::recommendation::Action;
use comfy_table::{
    Attribute, Cell, CellAlignment, Color, ContentArrangement, Table, modifiers::UTF8_ROUND_CORNERS,
    presets::UTF8_BORDERS_ONLY,
};

fn header(titles: &[&str]) -> Vec<Cell> {
    titles
        .iter()
        .map(|t| Cell::new(t).add_attribute(Attribute::Bold))
        .collect()
}

fn rsi_color(rsi: f64) -> Color {
    if rsi >= 70.0 {
        Color::Red
    } else if rsi <= 30.0 {
        Color::Green
    } else {
        Color::Grey
    }
}

/// Per-symbol view of the run: indicators next to the model's call.
pub fn market_table(summary: &RunSummary) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_BORDERS_ONLY)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header(&["Metal", "Price", "RSI", "Bands", "Trend", "Guess", "Target"]));

    for snapshot in summary.market.iter() {
        let symbol = snapshot.symbol;
        let fallback = summary.fallback_symbols.contains(&symbol);

        let name = if fallback {
            format!("{} ({}) *", symbol.name(), symbol)
        } else {
            format!("{} ({})", symbol.name(), symbol)
        };

        let bands = match snapshot.bb_status {
            BbStatus::AboveHigh => "above high",
            BbStatus::BelowLow => "below low",
            BbStatus::WithinRange => "within",
        };
        let trend = match snapshot.trend {
            Trend::Up => "↗",
            Trend::Down => "↘",
            Trend::Sideways => "→",
        };

        let (guess_cell, target_cell) = match summary.recommendations.get(symbol) {
            Some(rec) => {
                let color = match rec.action() {
                    Action::Buy => Color::Green,
                    Action::Sell => Color::Red,
                    Action::Hold => Color::Yellow,
                };
                (
                    Cell::new(&rec.ai_guess).fg(color),
                    Cell::new(format!("{:.2}", rec.target_price)).set_alignment(CellAlignment::Right),
                )
            }
            None => (Cell::new("-"), Cell::new("-")),
        };

        table.add_row(vec![
            Cell::new(name).fg(Color::Cyan),
            Cell::new(format!("{:.2}", snapshot.price)).set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.0}", snapshot.rsi))
                .fg(rsi_color(snapshot.rsi))
                .set_alignment(CellAlignment::Right),
            Cell::new(bands),
            Cell::new(trend),
            guess_cell,
            target_cell,
        ]);
    }

    table
}

pub fn delivery_line(summary: &RunSummary) -> String {
    let archive = match summary.archive {
        ArchiveStatus::Inserted => "archived",
        ArchiveStatus::AlreadyArchived => "already archived",
        ArchiveStatus::Failed => "archive FAILED",
    };
    format!(
        "{}: sent {}/{} emails, {}",
        summary.date.format("%Y-%m-%d"),
        summary.sent,
        summary.subscribers,
        archive
    )
}

pub fn print(summary: &RunSummary) {
    println!("\n{}", market_table(summary));
    if !summary.fallback_symbols.is_empty() {
        println!("* insufficient history, neutral fallback values");
    }
    println!("{}", delivery_line(summary));
    for email in &summary.failed {
        println!("  failed: {}", email);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::{MarketSnapshot, Symbol};
    use crate::recommendation::parse_recommendations;
    use crate::recommendation::tests::full_reply;
    use chrono::NaiveDate;

    fn summary() -> RunSummary {
        RunSummary {
            date: NaiveDate::from_ymd_opt(2026, 10, 16).unwrap(),
            market: Symbol::ALL.iter().map(|&s| MarketSnapshot::fallback(s)).collect(),
            recommendations: parse_recommendations(&full_reply()).unwrap(),
            fallback_symbols: vec![Symbol::Pd],
            archive: ArchiveStatus::AlreadyArchived,
            subscribers: 10,
            sent: 9,
            failed: vec!["user3@example.com".to_string()],
        }
    }

    #[test]
    fn test_table_has_row_per_symbol() {
        let rendered = market_table(&summary()).to_string();
        for symbol in Symbol::ALL {
            assert!(rendered.contains(symbol.name()));
        }
        assert!(rendered.contains("Palladium (Pd) *"));
        assert!(!rendered.contains("Gold (XAU) *"));
    }

    #[test]
    fn test_delivery_line() {
        assert_eq!(delivery_line(&summary()), "2026-10-16: sent 9/10 emails, already archived");
    }
}
