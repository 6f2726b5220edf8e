use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

const NBSP: char = '\u{a0}';
const NARROW_NBSP: char = '\u{202f}';

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    #[default]
    Usd,
    Eur,
    Gbp,
}

impl Currency {
    pub const ALL: [Currency; 3] = [Currency::Usd, Currency::Eur, Currency::Gbp];

    pub fn code(self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
            Currency::Gbp => "GBP",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.code())
    }
}

impl std::str::FromStr for Currency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Currency::ALL
            .into_iter()
            .find(|c| c.code().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unsupported currency {:?}", s))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Locale {
    #[default]
    #[serde(rename = "en-US")]
    EnUs,
    #[serde(rename = "en-GB")]
    EnGb,
    #[serde(rename = "de-DE")]
    DeDe,
    #[serde(rename = "fr-FR")]
    FrFr,
}

impl Locale {
    pub const ALL: [Locale; 4] = [Locale::EnUs, Locale::EnGb, Locale::DeDe, Locale::FrFr];

    pub fn tag(self) -> &'static str {
        match self {
            Locale::EnUs => "en-US",
            Locale::EnGb => "en-GB",
            Locale::DeDe => "de-DE",
            Locale::FrFr => "fr-FR",
        }
    }

    pub fn lang(self) -> &'static str {
        &self.tag()[..2]
    }

    fn group_separator(self) -> char {
        match self {
            Locale::EnUs | Locale::EnGb => ',',
            Locale::DeDe => '.',
            Locale::FrFr => NARROW_NBSP,
        }
    }

    fn currency_symbol(self, currency: Currency) -> &'static str {
        match (self, currency) {
            (Locale::EnGb, Currency::Usd) => "US$",
            (Locale::FrFr, Currency::Usd) => "$US",
            (Locale::FrFr, Currency::Gbp) => "£GB",
            (_, Currency::Usd) => "$",
            (_, Currency::Eur) => "€",
            (_, Currency::Gbp) => "£",
        }
    }

    fn symbol_first(self) -> bool {
        matches!(self, Locale::EnUs | Locale::EnGb)
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.tag())
    }
}

impl std::str::FromStr for Locale {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Locale::ALL
            .into_iter()
            .find(|l| l.tag().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unsupported locale {:?}", s))
    }
}

/// Multipliers converting a USD amount into each supported currency.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FxRates(HashMap<Currency, f64>);

impl FxRates {
    pub fn from_pairs<I: IntoIterator<Item = (Currency, f64)>>(pairs: I) -> Self {
        let mut rates: HashMap<Currency, f64> = pairs.into_iter().collect();
        rates.insert(Currency::Usd, 1.0);
        Self(rates)
    }

    /// Rate for `currency`; an unknown currency converts 1:1.
    pub fn get(&self, currency: Currency) -> f64 {
        self.0.get(&currency).copied().unwrap_or(1.0)
    }
}

/// Converts, rounds to a whole unit and formats the way the locale writes prices.
///
/// No fraction digits are ever printed, regardless of the currency's minor unit.
pub fn format_metal_price(price_usd: f64, fx_rate: f64, currency: Currency, locale: Locale) -> String {
    let rounded = (price_usd * fx_rate).round();
    let negative = rounded < 0.0;
    let digits = group_digits(rounded.abs() as u64, locale.group_separator());
    let symbol = locale.currency_symbol(currency);
    let sign = if negative { "-" } else { "" };

    if locale.symbol_first() {
        format!("{}{}{}", sign, symbol, digits)
    } else {
        format!("{}{}{}{}", sign, digits, NBSP, symbol)
    }
}

fn group_digits(value: u64, separator: char) -> String {
    let raw = value.to_string();
    let mut out = String::with_capacity(raw.len() + raw.len() / 3 * 3);
    for (i, ch) in raw.chars().enumerate() {
        if i > 0 && (raw.len() - i) % 3 == 0 {
            out.push(separator);
        }
        out.push(ch);
    }
    out
}
