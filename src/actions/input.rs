//! Synthetic form input
//!
//! Generates the values typed by `enter_text` actions with an `input_type`.

use chrono::{Duration, Local, NaiveDate};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

pub const DEFAULT_EMAIL_DOMAIN: &str = "growthnatives.com";
pub const DATE_FORMAT: &str = "%m/%d/%Y";

const ASCII_LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputType {
    String,
    Email,
    Phone,
    ZipCode,
    Date,
}

impl InputType {
    pub fn generate<R: Rng + ?Sized>(self, rng: &mut R) -> String {
        match self {
            InputType::String => generate_string(rng, 1, 10),
            InputType::Email => generate_email(rng, DEFAULT_EMAIL_DOMAIN),
            InputType::Phone => generate_phone(rng, PhoneFormat::default()),
            InputType::ZipCode => generate_zip_code(rng),
            InputType::Date => generate_date(rng, Local::now().date_naive()),
        }
    }
}

/// Random upper and lower case letters, `min..=max` long
pub fn generate_string<R: Rng + ?Sized>(rng: &mut R, min: usize, max: usize) -> String {
    let (min, max) = if min > max { (max, min) } else { (min, max) };
    let length = rng.gen_range(min..=max);
    (0..length)
        .filter_map(|_| ASCII_LETTERS.choose(rng).map(|&b| b as char))
        .collect()
}

/// `first.last@domain`, tagged `test+` on the default domain
pub fn generate_email<R: Rng + ?Sized>(rng: &mut R, domain: &str) -> String {
    let first = generate_string(rng, 6, 10);
    let last = generate_string(rng, 6, 10);
    let tag = if domain == DEFAULT_EMAIL_DOMAIN { "test+" } else { "" };
    format!("{}{}.{}@{}", tag, first, last, domain)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PhoneFormat {
    /// Overrides every other flag: `555.555.5555`
    pub decimals: bool,
    pub parenthesis: bool,
    pub dash: bool,
    pub space: bool,
}

pub fn generate_phone<R: Rng + ?Sized>(rng: &mut R, format: PhoneFormat) -> String {
    // Neither the area code nor the exchange may start with 0 or 1
    let area_code: String = (0..3).map(|_| digit(rng, 2..=9)).collect();
    let start: String = (0..3).map(|_| digit(rng, 2..=9)).collect();
    let finish: String = (0..4).map(|_| digit(rng, 0..=9)).collect();

    if format.decimals {
        return format!("{}.{}.{}", area_code, start, finish);
    }

    let area_code = if format.parenthesis {
        format!("({})", area_code)
    } else {
        area_code
    };

    let number = if format.dash {
        if !format.space && !format.parenthesis {
            format!("-{}-{}", start, finish)
        } else {
            format!("{}-{}", start, finish)
        }
    } else if format.space {
        format!("{} {}", start, finish)
    } else {
        format!("{}{}", start, finish)
    };

    if format.space {
        format!("{} {}", area_code, number)
    } else {
        format!("{}{}", area_code, number)
    }
}

/// Five digits, never starting with 0
pub fn generate_zip_code<R: Rng + ?Sized>(rng: &mut R) -> String {
    let mut zip = digit(rng, 1..=9).to_string();
    zip.extend((0..4).map(|_| digit(rng, 0..=9)));
    zip
}

/// A birth-date style value between 100 and 20 years before `today`
pub fn generate_date<R: Rng + ?Sized>(rng: &mut R, today: NaiveDate) -> String {
    let latest = today - Duration::weeks(52 * 20);
    let earliest = today - Duration::weeks(52 * 100);
    let span = (latest - earliest).num_days();
    let date = earliest + Duration::days(rng.gen_range(0..=span));
    date.format(DATE_FORMAT).to_string()
}

fn digit<R: Rng + ?Sized>(rng: &mut R, range: std::ops::RangeInclusive<u32>) -> char {
    char::from_digit(rng.gen_range(range), 10).unwrap_or('0')
}
