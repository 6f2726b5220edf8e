//! Daily digest HTML, one variant per plan.

use crate::format::{Currency, FxRates, Locale, format_metal_price};
use crate::indicators::Trend;
use crate::market_data::{MarketData, Symbol};
use crate::recommendation::{Action, Recommendations};
use crate::subscribers::Plan;
use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};

/// Symbol shown to basic subscribers.
pub const BASIC_SYMBOL: Symbol = Symbol::Xag;

const PRO_STYLES: &str = r#"
    body { font-family: 'Helvetica Neue', Helvetica, Arial, sans-serif; background-color: #111827; margin: 0; padding: 0; color: #F3F4F6; }
    .container { max-width: 600px; margin: 0 auto; background-color: #1F2937; padding: 20px; border-radius: 8px; border: 1px solid #374151; }
    .header { text-align: center; border-bottom: 2px solid #D4AF37; padding-bottom: 20px; margin-bottom: 30px; }
    .title { color: #D4AF37; margin: 0; font-size: 28px; text-transform: uppercase; letter-spacing: 1px; }
    .subtitle { color: #9CA3AF; margin: 5px 0 0; font-size: 14px; }
    .pulse { margin-bottom: 25px; padding: 15px; background: rgba(0,0,0,0.2); border-left: 4px solid #D4AF37; color: #D1D5DB; font-size: 14px; }
    .card { background: rgba(255,255,255,0.05); border: 1px solid rgba(255,255,255,0.1); border-radius: 12px; padding: 20px; margin-bottom: 20px; }
    .metal-header { display: flex; justify-content: space-between; align-items: center; margin-bottom: 12px; }
    .metal-name { font-size: 20px; font-weight: bold; color: #F3F4F6; }
    .badge { padding: 4px 12px; border-radius: 99px; font-size: 12px; font-weight: bold; text-transform: uppercase; color: white; }
    .badge-buy { background: linear-gradient(135deg, #10B981 0%, #059669 100%); }
    .badge-sell { background: linear-gradient(135deg, #EF4444 0%, #DC2626 100%); }
    .badge-hold { background: linear-gradient(135deg, #F59E0B 0%, #D97706 100%); }
    .data-grid { display: grid; grid-template-columns: 1fr 1fr; gap: 10px; margin-bottom: 15px; font-size: 14px; color: #E5E7EB; }
    .price-value { font-size: 18px; font-weight: bold; color: #F3F4F6; }
    .ai-box { background: rgba(16, 185, 129, 0.1); border-left: 3px solid #10B981; padding: 12px; font-style: italic; font-size: 14px; color: #D1FAE5; }
    .footer { text-align: center; color: #6B7280; font-size: 12px; margin-top: 40px; border-top: 1px solid #374151; padding-top: 20px; }
    .link { color: #6B7280; text-decoration: underline; margin: 0 5px; }
"#;

const BASIC_STYLES: &str = r#"
    body { font-family: 'Helvetica Neue', Helvetica, Arial, sans-serif; background-color: #F3F4F6; margin: 0; padding: 0; color: #1F2937; }
    .container { max-width: 600px; margin: 0 auto; background-color: #FFFFFF; border-radius: 8px; border: 1px solid #E5E7EB; overflow: hidden; }
    .header { background: #1F2937; padding: 20px; text-align: center; }
    .title { color: #E5E7EB; margin: 0; font-size: 20px; }
    .date { color: #9CA3AF; font-size: 12px; margin-top: 5px; }
    .content { padding: 30px 20px; text-align: center; }
    .metal-card { border: 2px solid #3B82F6; border-radius: 12px; padding: 25px; background: #EEF2FF; margin-bottom: 30px; }
    .big-price { font-size: 36px; font-weight: 800; color: #1F2937; margin: 10px 0; }
    .trend-arrow { color: #3B82F6; font-weight: bold; font-size: 18px; }
    .cta-box { background: linear-gradient(135deg, #111827 0%, #374151 100%); color: white; padding: 25px; text-align: center; }
    .btn { background: #D4AF37; color: #111827; text-decoration: none; padding: 12px 24px; border-radius: 6px; font-weight: bold; display: inline-block; margin-top: 10px; }
    .footer { text-align: center; color: #9CA3AF; font-size: 11px; padding: 20px; background: #F9FAFB; }
"#;

/// Everything a render needs. Built once per subscriber from run-wide data.
#[derive(Debug, Clone, Copy)]
pub struct DigestContext<'a> {
    pub recommendations: &'a Recommendations,
    pub market: &'a MarketData,
    pub currency: Currency,
    pub locale: Locale,
    pub fx_rates: &'a FxRates,
    pub date: NaiveDate,
    pub site_url: &'a str,
}

impl DigestContext<'_> {
    fn price(&self, usd: f64) -> String {
        format_metal_price(usd, self.fx_rates.get(self.currency), self.currency, self.locale)
    }

    fn rsi(&self, symbol: Symbol) -> String {
        self.market
            .get(symbol)
            .map(|m| format!("{:.0}", m.rsi))
            .unwrap_or_else(|| "N/A".to_string())
    }

    fn trend_label(&self, symbol: Symbol) -> &'static str {
        match self.market.get(symbol).map(|m| m.trend) {
            Some(Trend::Up) => "Bullish ↗",
            Some(Trend::Down) => "Bearish ↘",
            _ => "Neutral →",
        }
    }

    fn site(&self) -> &str {
        self.site_url.trim_end_matches('/')
    }
}

pub fn render_for_plan(plan: Plan, ctx: &DigestContext) -> String {
    match plan {
        Plan::Pro => render_pro(ctx),
        Plan::Basic => render_basic(ctx),
    }
}

/// Subject line listing the symbols the plan covers.
pub fn subject_for_plan(plan: Plan, recommendations: &Recommendations) -> String {
    let symbols: Vec<&str> = match plan {
        Plan::Basic if recommendations.get(BASIC_SYMBOL).is_some() => vec![BASIC_SYMBOL.code()],
        _ => recommendations.symbols().into_iter().map(Symbol::code).collect(),
    };
    format!("Daily Signals: {}", symbols.join(", "))
}

pub fn long_date(date: NaiveDate, locale: Locale) -> String {
    let (pattern, chrono_locale) = match locale {
        Locale::EnUs => ("%A, %B %-d, %Y", chrono::Locale::en_US),
        Locale::EnGb => ("%A %-d %B %Y", chrono::Locale::en_GB),
        Locale::DeDe => ("%A, %-d. %B %Y", chrono::Locale::de_DE),
        Locale::FrFr => ("%A %-d %B %Y", chrono::Locale::fr_FR),
    };
    let midnight = Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN));
    midnight.format_localized(pattern, chrono_locale).to_string()
}

pub fn render_pro(ctx: &DigestContext) -> String {
    let today = long_date(ctx.date, ctx.locale);
    let site = ctx.site();

    let mut cards = String::new();
    for (symbol, rec) in ctx.recommendations.iter() {
        let badge_class = match rec.action() {
            Action::Buy => "badge-buy",
            Action::Sell => "badge-sell",
            Action::Hold => "badge-hold",
        };

        cards.push_str(&format!(
            r#"
        <div class="card" data-symbol="{code}">
            <div class="metal-header">
                <span class="metal-name">{name} ({code})</span>
                <span class="badge {badge_class}">{guess}</span>
            </div>
            <div class="data-grid">
                <div>Target: <span class="price-value">{price}</span></div>
                <div>RSI: {rsi}</div>
                <div style="grid-column: span 2;">Trend: {trend}</div>
            </div>
            <div class="ai-box">
                &quot; {reasoning} &quot;
            </div>
        </div>
"#,
            code = symbol.code(),
            name = symbol.name(),
            badge_class = badge_class,
            guess = escape_html(&rec.ai_guess),
            price = ctx.price(rec.target_price),
            rsi = ctx.rsi(symbol),
            trend = ctx.trend_label(symbol),
            reasoning = escape_html(&rec.reasoning),
        ));
    }

    format!(
        r#"<!DOCTYPE html>
<html lang="{lang}">
<head>
    <meta charset="utf-8">
    <style>{styles}</style>
</head>
<body>
    <div class="container">
        <div class="header">
            <h1 class="title">MetalDetectors Daily</h1>
            <p class="subtitle">High-Conviction AI Signals • {today}</p>
        </div>

        <div class="pulse">
            <strong>Market Pulse:</strong> Global volatility is creating opportunities. See today's AI-curated picks below.
        </div>
{cards}
        <div class="footer">
            <p>Not financial advice. Trading involves risk.</p>
            <p>
                <a href="{site}/account" class="link">Manage Account</a> |
                <a href="{site}/unsubscribe" class="link">Unsubscribe</a>
            </p>
            <p>© {year} MetalDetectors Inc.</p>
        </div>
    </div>
</body>
</html>
"#,
        lang = ctx.locale.lang(),
        styles = PRO_STYLES,
        today = today,
        cards = cards,
        site = site,
        year = ctx.date.format("%Y"),
    )
}

/// Silver-only digest with an upgrade block. Falls back to the pro layout if
/// the silver recommendation is missing.
pub fn render_basic(ctx: &DigestContext) -> String {
    let Some(rec) = ctx.recommendations.get(BASIC_SYMBOL) else {
        return render_pro(ctx);
    };

    let today = long_date(ctx.date, ctx.locale);
    let site = ctx.site();
    let locked: Vec<&str> = Symbol::ALL
        .iter()
        .filter(|&&s| s != BASIC_SYMBOL)
        .map(|s| s.code())
        .collect();

    format!(
        r#"<!DOCTYPE html>
<html lang="{lang}">
<head>
    <meta charset="utf-8">
    <style>{styles}</style>
</head>
<body>
    <div class="container">
        <div class="header">
            <h1 class="title">MetalDetectors <span style="font-weight:normal; color:#9CA3AF;">Basic</span></h1>
            <div class="date">{today}</div>
        </div>

        <div class="content">
            <div class="metal-card" data-symbol="{code}">
                <h2 style="margin:0; color:#4B5563; text-transform:uppercase; font-size:14px; letter-spacing:1px;">{name} ({code}) Snapshot</h2>
                <div class="big-price">{price}</div>
                <div class="trend-arrow">RSI: {rsi}</div>
                <p style="color:#6B7280; font-size:14px; line-height:1.5; margin-top:15px;">
                    {reasoning}
                </p>
            </div>
        </div>

        <div class="cta-box">
            <h3 style="margin:0 0 10px 0; color:#F3F4F6;">Missed Gold &amp; AI Picks?</h3>
            <p style="margin:0 0 20px 0; color:#D1D5DB; font-size:14px;">Upgrade to Pro to unlock signals for {locked}.</p>
            <a href="{site}" class="btn">Upgrade to Pro ($5/mo)</a>
        </div>

        <div class="footer">
            <p>Not financial advice. Trading involves risk.</p>
            <a href="{site}/unsubscribe" style="color:#9CA3AF;">Unsubscribe</a>
        </div>
    </div>
</body>
</html>
"#,
        lang = ctx.locale.lang(),
        styles = BASIC_STYLES,
        today = today,
        code = BASIC_SYMBOL.code(),
        name = BASIC_SYMBOL.name(),
        price = ctx.price(rec.target_price),
        rsi = ctx.rsi(BASIC_SYMBOL),
        reasoning = escape_html(&rec.reasoning),
        locked = locked.join(", "),
        site = site,
    )
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::MarketSnapshot;
    use crate::recommendation::{Recommendation, parse_recommendations};
    use crate::recommendation::tests::full_reply;
    use crate::storage_utils::FxConfig;

    fn market() -> MarketData {
        Symbol::ALL
            .iter()
            .map(|&s| MarketSnapshot {
                rsi: 63.4,
                trend: if s == Symbol::Cu { Trend::Down } else { Trend::Up },
                ..MarketSnapshot::fallback(s)
            })
            .collect()
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
    }

    fn card_count(html: &str) -> usize {
        html.matches("data-symbol=").count()
    }

    #[test]
    fn test_pro_has_five_cards() {
        let recs = parse_recommendations(&full_reply()).unwrap();
        let market = market();
        let fx = FxConfig::default().static_rates();
        let ctx = DigestContext {
            recommendations: &recs,
            market: &market,
            currency: Currency::Usd,
            locale: Locale::EnUs,
            fx_rates: &fx,
            date: date(),
            site_url: "https://metaldetectors.info/",
        };

        let html = render_for_plan(Plan::Pro, &ctx);
        assert_eq!(card_count(&html), 5);
        assert!(html.contains("Friday, October 16, 2026"));
        assert!(html.contains("$2,055"));
        assert!(html.contains("RSI: 63"));
        assert!(html.contains("badge badge-buy\">Buy early until pivot at 2050"));
        assert!(html.contains("badge badge-sell\">Short at pivot"));
        assert!(html.contains("badge badge-hold\">Hold until news"));
        assert!(html.contains("Trend: Bearish ↘"));
        assert!(html.contains("https://metaldetectors.info/unsubscribe"));
    }

    #[test]
    fn test_basic_has_only_silver() {
        let recs = parse_recommendations(&full_reply()).unwrap();
        let market = market();
        let fx = FxConfig::default().static_rates();
        let ctx = DigestContext {
            recommendations: &recs,
            market: &market,
            currency: Currency::Eur,
            locale: Locale::DeDe,
            fx_rates: &fx,
            date: date(),
            site_url: "https://metaldetectors.info",
        };

        let html = render_for_plan(Plan::Basic, &ctx);
        assert_eq!(card_count(&html), 1);
        assert!(html.contains("data-symbol=\"XAG\""));
        assert!(html.contains("Upgrade to Pro"));
        assert!(html.contains("Freitag, 16. Oktober 2026"));
        // 24.5 * 0.92 = 22.54
        assert!(html.contains("23\u{a0}€"));
        assert!(!html.contains("Buy early"));
    }

    #[test]
    fn test_basic_without_silver_renders_pro() {
        let full = parse_recommendations(&full_reply()).unwrap();
        let recs: Recommendations = full
            .iter()
            .filter(|(s, _)| *s != Symbol::Xag)
            .map(|(s, r)| (s, r.clone()))
            .collect();
        let market = market();
        let fx = FxConfig::default().static_rates();
        let ctx = DigestContext {
            recommendations: &recs,
            market: &market,
            currency: Currency::Usd,
            locale: Locale::EnUs,
            fx_rates: &fx,
            date: date(),
            site_url: "https://metaldetectors.info",
        };

        let html = render_basic(&ctx);
        assert!(html.contains("MetalDetectors Daily"));
        assert_eq!(card_count(&html), 4);
        assert_eq!(subject_for_plan(Plan::Basic, &recs), "Daily Signals: XAU, Cu, Pt, Pd");
    }

    #[test]
    fn test_render_is_deterministic_and_escaped() {
        let mut recs: Vec<(Symbol, Recommendation)> = parse_recommendations(&full_reply())
            .unwrap()
            .iter()
            .map(|(s, r)| (s, r.clone()))
            .collect();
        recs[0].1.reasoning = "<script>alert('x')</script>".to_string();
        let recs: Recommendations = recs.into_iter().collect();
        let market = MarketData::default();
        let fx = FxConfig::default().static_rates();
        let ctx = DigestContext {
            recommendations: &recs,
            market: &market,
            currency: Currency::Gbp,
            locale: Locale::EnGb,
            fx_rates: &fx,
            date: date(),
            site_url: "https://metaldetectors.info",
        };

        let first = render_pro(&ctx);
        assert_eq!(first, render_pro(&ctx));
        assert!(!first.contains("<script>"));
        assert!(first.contains("&lt;script&gt;"));
        assert!(first.contains("RSI: N/A"));
        assert!(first.contains("Trend: Neutral →"));
    }

    #[test]
    fn test_subjects() {
        let recs = parse_recommendations(&full_reply()).unwrap();
        assert_eq!(subject_for_plan(Plan::Pro, &recs), "Daily Signals: XAU, XAG, Cu, Pt, Pd");
        assert_eq!(subject_for_plan(Plan::Basic, &recs), "Daily Signals: XAG");
    }

    #[test]
    fn test_long_dates() {
        assert_eq!(long_date(date(), Locale::EnGb), "Friday 16 October 2026");
        assert_eq!(long_date(date(), Locale::FrFr), "vendredi 16 octobre 2026");
    }
}
