//! `{{$keyword}}` dynamic values, regenerated on every expansion.
//!
//! Runs after variable expansion, so a variable literally named
//! `$randomInt` still wins. Keywords without a generator stay verbatim.

use rand::Rng;
use regex::{Captures, Regex};
use std::sync::LazyLock;
use time::OffsetDateTime;

static MOCK_VAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\$(\w+)\}\}").expect("valid regex"));

const FIRST_NAMES: &[&str] = &[
    "James", "Mary", "John", "Patricia", "Robert", "Jennifer", "Michael", "Linda", "William",
    "Elizabeth", "David", "Barbara", "Richard", "Susan", "Joseph", "Jessica", "Emma", "Olivia",
    "Liam", "Noah", "Ava", "Mateo", "Aiko", "Priya", "Lars",
];
const LAST_NAMES: &[&str] = &[
    "Smith", "Johnson", "Williams", "Brown", "Jones", "Garcia", "Miller", "Davis", "Rodriguez",
    "Martinez", "Hernandez", "Lopez", "Wilson", "Anderson", "Taylor", "Moore", "Jackson", "Lee",
    "Nakamura", "Okafor", "Novak", "Schmidt",
];
const NAME_PREFIXES: &[&str] = &["Mr.", "Mrs.", "Ms.", "Miss", "Dr."];
const NAME_SUFFIXES: &[&str] = &["Jr.", "Sr.", "I", "II", "III", "IV", "V", "MD", "DDS", "PhD"];
const COLORS: &[&str] = &[
    "red", "orange", "yellow", "green", "blue", "indigo", "violet", "black", "white", "gray",
    "teal", "cyan", "magenta", "maroon", "olive", "navy", "purple", "pink", "gold", "silver",
];
const ABBREVIATIONS: &[&str] = &["SQL", "PCI", "JSON", "HTTP", "XML"];
const PROTOCOLS: &[&str] = &["http", "https"];
const LOCALES: &[&str] = &[
    "en", "de", "fr", "es", "it", "pt", "nl", "sv", "pl", "ru", "ja", "ko", "zh", "ar", "hi",
];
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_4 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Mobile/15E148",
];
const CITIES: &[&str] = &[
    "Springfield", "Riverside", "Franklin", "Greenville", "Bristol", "Clinton", "Fairview",
    "Salem", "Madison", "Georgetown", "Arlington", "Ashland",
];
const STREET_NAMES: &[&str] = &[
    "Main Street", "Oak Avenue", "Maple Drive", "Cedar Lane", "Pine Road", "Elm Street",
    "Washington Boulevard", "Lake View Road", "Hillcrest Way", "Park Place",
];
const COUNTRIES: &[(&str, &str)] = &[
    ("United States", "US"),
    ("Germany", "DE"),
    ("France", "FR"),
    ("Japan", "JP"),
    ("Brazil", "BR"),
    ("India", "IN"),
    ("Canada", "CA"),
    ("Australia", "AU"),
    ("Nigeria", "NG"),
    ("Sweden", "SE"),
    ("Mexico", "MX"),
    ("Spain", "ES"),
];
const PRODUCT_ADJECTIVES: &[&str] = &[
    "Ergonomic", "Rustic", "Sleek", "Handcrafted", "Refined", "Small", "Practical", "Gorgeous",
];
const PRODUCT_MATERIALS: &[&str] = &["Steel", "Wooden", "Cotton", "Granite", "Rubber", "Bronze"];
const PRODUCT_NOUNS: &[&str] = &["Chair", "Table", "Keyboard", "Shoes", "Hat", "Lamp", "Gloves"];
const COMPANY_SUFFIXES: &[&str] = &["Inc", "LLC", "Group", "and Sons", "Ltd"];
const EMAIL_DOMAINS: &[&str] = &["example.com", "example.org", "example.net"];
const ALPHANUMERIC: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const PASSWORD_CHARS: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789_-";

/// Generate a value for `keyword` (without the `$`), if one is known.
pub fn mock_value(keyword: &str) -> Option<String> {
    let mut rng = rand::rng();
    let value = match keyword {
        "guid" | "randomUUID" => uuid::Uuid::new_v4().to_string(),
        "timestamp" => OffsetDateTime::now_utc().unix_timestamp().to_string(),
        "isoTimestamp" => iso_timestamp(OffsetDateTime::now_utc()),
        "randomAlphaNumeric" => random_string(&mut rng, ALPHANUMERIC, 1),
        "randomBoolean" => rng.random_bool(0.5).to_string(),
        "randomInt" => rng.random_range(0..=1000).to_string(),
        "randomColor" => pick(&mut rng, COLORS).to_string(),
        "randomHexColor" => format!("#{:06x}", rng.random_range(0..=0xff_ffffu32)),
        "randomAbbreviation" => pick(&mut rng, ABBREVIATIONS).to_string(),
        "randomIP" => {
            let octets: [u8; 4] = rng.random();
            std::net::Ipv4Addr::from(octets).to_string()
        }
        "randomIPV6" => {
            let segments: [u16; 8] = rng.random();
            segments
                .iter()
                .map(|s| format!("{:x}", s))
                .collect::<Vec<_>>()
                .join(":")
        }
        "randomMACAddress" => {
            let bytes: [u8; 6] = rng.random();
            bytes
                .iter()
                .map(|b| format!("{:02x}", b))
                .collect::<Vec<_>>()
                .join(":")
        }
        "randomPassword" => random_string(&mut rng, PASSWORD_CHARS, 15),
        "randomLocale" => pick(&mut rng, LOCALES).to_string(),
        "randomUserAgent" => pick(&mut rng, USER_AGENTS).to_string(),
        "randomProtocol" => pick(&mut rng, PROTOCOLS).to_string(),
        "randomSemver" => format!(
            "{}.{}.{}",
            rng.random_range(0..10),
            rng.random_range(0..10),
            rng.random_range(0..10)
        ),
        "randomFirstName" => pick(&mut rng, FIRST_NAMES).to_string(),
        "randomLastName" => pick(&mut rng, LAST_NAMES).to_string(),
        "randomFullName" => format!(
            "{} {}",
            pick(&mut rng, FIRST_NAMES),
            pick(&mut rng, LAST_NAMES)
        ),
        "randomNamePrefix" => pick(&mut rng, NAME_PREFIXES).to_string(),
        "randomNameSuffix" => pick(&mut rng, NAME_SUFFIXES).to_string(),
        "randomPhoneNumber" => format!(
            "{:03}-{:03}-{:04}",
            rng.random_range(200..1000),
            rng.random_range(0..1000),
            rng.random_range(0..10000)
        ),
        "randomCity" => pick(&mut rng, CITIES).to_string(),
        "randomStreetName" => pick(&mut rng, STREET_NAMES).to_string(),
        "randomStreetAddress" => format!(
            "{} {}",
            rng.random_range(1..10000),
            pick(&mut rng, STREET_NAMES)
        ),
        "randomCountry" => pick(&mut rng, COUNTRIES).0.to_string(),
        "randomCountryCode" => pick(&mut rng, COUNTRIES).1.to_string(),
        "randomLatitude" => format!("{:.4}", rng.random_range(-90.0..=90.0f64)),
        "randomLongitude" => format!("{:.4}", rng.random_range(-180.0..=180.0f64)),
        "randomAvatarImage" => format!(
            "https://avatars.example.com/{}.jpg",
            rng.random_range(1..=1250)
        ),
        "randomImageUrl" => format!(
            "https://images.example.com/640/480?id={}",
            rng.random_range(1..=10000)
        ),
        "randomPrice" => format!("{:.2}", rng.random_range(0..=100_000) as f64 / 100.0),
        "randomProduct" => format!(
            "{} {} {}",
            pick(&mut rng, PRODUCT_ADJECTIVES),
            pick(&mut rng, PRODUCT_MATERIALS),
            pick(&mut rng, PRODUCT_NOUNS)
        ),
        "randomCompanyName" => format!(
            "{} {}",
            pick(&mut rng, LAST_NAMES),
            pick(&mut rng, COMPANY_SUFFIXES)
        ),
        "randomEmail" => format!(
            "{}.{}{}@{}",
            pick(&mut rng, FIRST_NAMES).to_lowercase(),
            pick(&mut rng, LAST_NAMES).to_lowercase(),
            rng.random_range(0..100),
            pick(&mut rng, EMAIL_DOMAINS)
        ),
        _ => return None,
    };
    Some(value)
}

/// Replace every known `{{$keyword}}` in `text`.
pub fn replace_mock_vars(text: &str, json_escape: bool) -> String {
    if !text.contains("{{$") {
        return text.to_string();
    }
    MOCK_VAR
        .replace_all(text, |caps: &Captures| match mock_value(&caps[1]) {
            Some(v) if json_escape => super::engine::escape_json_string(&v),
            Some(v) => v,
            None => {
                tracing::debug!(keyword = &caps[1], "no generator for dynamic variable");
                caps[0].to_string()
            }
        })
        .into_owned()
}

fn pick<'a, T, R: Rng>(rng: &mut R, items: &'a [T]) -> &'a T {
    &items[rng.random_range(0..items.len())]
}

fn random_string<R: Rng>(rng: &mut R, charset: &[u8], len: usize) -> String {
    (0..len)
        .map(|_| *pick(rng, charset) as char)
        .collect()
}

/// `YYYY-MM-DDTHH:MM:SS.mmmZ`
fn iso_timestamp(now: OffsetDateTime) -> String {
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:03}Z",
        now.year(),
        u8::from(now.month()),
        now.day(),
        now.hour(),
        now.minute(),
        now.second(),
        now.millisecond()
    )
}
