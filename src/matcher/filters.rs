//! Field-type registry and the validators attached to output keys.
//!
//! Every output key name maps to a [`KeyType`]. Types with a validator run it
//! on each extracted value; a validator normalizes the value in place and
//! returns `false` when the value must be discarded. After a `false` return
//! the value is in an unspecified partial state.

use std::fmt;

/// Validate-and-normalize function attached to a key type.
pub type FilterFn = fn(&mut String) -> bool;

/// Semantic type of an output key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyType {
    Phone,
    Idfx,
    Imei,
    Imsi,
    Mac,
    Longitude,
    Latitude,
    Email,
    IdCard,
    Unknown,
}

impl KeyType {
    /// Resolve a key name such as `APP_IMEI` or `FROM_LATITUDE`.
    ///
    /// Names without a dedicated type resolve to [`KeyType::Unknown`].
    pub fn from_key_name(name: &str) -> Self {
        match name {
            "PHONENUM" | "APP_MSISDN" | "RELATIONSHIP_MOBILEPHONE" | "DRIVER_PHONE"
            | "REGISTER_PHONE" | "COMPANY_PHONE" => KeyType::Phone,
            "IDFAorIDFV" | "APP_IDFA" | "APP_IDFV" => KeyType::Idfx,
            "APP_IMEI" => KeyType::Imei,
            "APP_IMSI" => KeyType::Imsi,
            "APP_MAC" | "WIFI_MAC" => KeyType::Mac,
            "APP_LONGITUDE" | "FROM_LONGITUDE" | "TO_LONGITUDE" => KeyType::Longitude,
            "APP_LATITUDE" | "FROM_LATITUDE" | "TO_LATITUDE" => KeyType::Latitude,
            "EMAIL" | "RELATIONSHIP_EMAIL" => KeyType::Email,
            "APP_IDCARD" => KeyType::IdCard,
            _ => KeyType::Unknown,
        }
    }

    /// Validator for this type, if it has one.
    pub fn filter(self) -> Option<FilterFn> {
        match self {
            KeyType::Phone => Some(phone_filter),
            KeyType::Imei => Some(imei_filter),
            KeyType::Imsi => Some(imsi_filter),
            KeyType::Mac => Some(mac_filter),
            KeyType::Longitude | KeyType::Latitude => Some(lonlat_filter),
            KeyType::Idfx => Some(idfx_filter),
            KeyType::Email => Some(email_filter),
            KeyType::IdCard | KeyType::Unknown => None,
        }
    }

    pub fn is_coordinate(self) -> bool {
        matches!(self, KeyType::Longitude | KeyType::Latitude)
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KeyType::Phone => "phone",
            KeyType::Idfx => "idfx",
            KeyType::Imei => "imei",
            KeyType::Imsi => "imsi",
            KeyType::Mac => "mac",
            KeyType::Longitude => "longitude",
            KeyType::Latitude => "latitude",
            KeyType::Email => "email",
            KeyType::IdCard => "idcard",
            KeyType::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// ITU mobile country codes accepted in an IMSI.
const IMSI_MCC: &[&str] = &[
    "202", "204", "206", "208", "212", "213", "214", "216", "218", "219", "220", "222", "225",
    "226", "228", "230", "231", "232", "234", "235", "238", "240", "242", "244", "246", "247",
    "248", "250", "255", "257", "259", "260", "262", "266", "268", "270", "272", "274", "276",
    "278", "280", "282", "283", "284", "286", "288", "290", "292", "293", "294", "295", "297",
    "302", "308", "310", "311", "312", "313", "314", "315", "316", "330", "332", "334", "338",
    "340", "342", "344", "346", "348", "350", "352", "354", "356", "358", "360", "362", "363",
    "364", "365", "366", "368", "370", "372", "374", "376", "400", "401", "402", "404", "405",
    "406", "410", "412", "413", "414", "415", "416", "417", "418", "419", "420", "421", "422",
    "424", "425", "426", "427", "428", "429", "430", "431", "432", "434", "436", "437", "438",
    "440", "441", "450", "452", "454", "455", "456", "457", "460", "461", "466", "467", "470",
    "472", "502", "505", "510", "514", "515", "520", "525", "528", "530", "534", "535", "536",
    "537", "539", "540", "541", "542", "543", "544", "545", "546", "547", "548", "549", "550",
    "551", "552", "555", "602", "603", "604", "605", "606", "607", "608", "609", "610", "611",
    "612", "613", "614", "615", "616", "617", "618", "619", "620", "621", "622", "623", "624",
    "625", "626", "627", "628", "629", "630", "631", "632", "633", "634", "635", "636", "637",
    "638", "639", "640", "641", "642", "643", "645", "646", "647", "648", "649", "650", "651",
    "652", "653", "654", "655", "657", "702", "704", "706", "708", "710", "712", "714", "716",
    "722", "724", "730", "732", "734", "736", "738", "740", "742", "744", "746", "748", "750",
    "901",
];

/// Mobile network codes valid under MCC 460.
const IMSI_CHINA_MNC: &[&str] = &[
    "00", "01", "02", "03", "04", "05", "06", "07", "08", "09", "11", "20",
];

fn all_digits(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_digit())
}

fn all_hex(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Mobile or short-form phone number. Keeps digits only and strips a leading
/// `86`/`086` country code.
pub fn phone_filter(value: &mut String) -> bool {
    value.retain(|c| c.is_ascii_digit());
    if value.starts_with("86") {
        value.drain(..2);
    } else if value.starts_with("086") {
        value.drain(..3);
    }

    let digits = value.as_bytes();
    if (3..=6).contains(&digits.len()) {
        return digits[0] == b'6' && (b'1'..=b'9').contains(&digits[1]);
    }
    if digits.len() != 11 || digits[0] != b'1' {
        return false;
    }

    let third = digits[2];
    match digits[1] {
        b'3' | b'8' => third.is_ascii_digit(),
        b'4' => (b'5'..=b'9').contains(&third),
        b'5' => third.is_ascii_digit() && third != b'4',
        b'6' => third == b'5' || third == b'6',
        b'7' => (b'0'..=b'8').contains(&third),
        b'9' => matches!(third, b'1' | b'5' | b'8' | b'9'),
        _ => false,
    }
}

pub fn imsi_filter(value: &mut String) -> bool {
    if value.len() != 15 || !all_digits(value) {
        return false;
    }
    let mcc = &value[..3];
    if !IMSI_MCC.contains(&mcc) {
        return false;
    }
    mcc != "460" || IMSI_CHINA_MNC.contains(&&value[3..5])
}

pub fn imei_filter(value: &mut String) -> bool {
    let bytes = value.as_bytes();
    match bytes.len() {
        14 => {
            if bytes[0] == b'9' && matches!(bytes[1], b'9' | b'8' | b'7') {
                return true;
            }
            if all_digits(value) {
                return true;
            }
            let second_ok = bytes[1].is_ascii_digit() || (b'A'..=b'F').contains(&bytes[1]);
            bytes[0] == b'A' && second_ok && all_hex(value)
        }
        15 => all_digits(value),
        _ => false,
    }
}

/// MAC address. The 17-character delimited form is reduced to 12 characters
/// by dropping every third character, then the result is lowercased.
pub fn mac_filter(value: &mut String) -> bool {
    if value.len() == 17 && value.is_ascii() {
        let compact: String = value
            .chars()
            .enumerate()
            .filter(|(idx, _)| idx % 3 != 2)
            .map(|(_, c)| c)
            .collect();
        *value = compact;
    }
    if value.len() != 12 || !all_hex(value) {
        return false;
    }
    value.make_ascii_lowercase();

    // three consecutive "00" octets mark a masked address
    let mut zero_run = 0;
    for octet in value.as_bytes().chunks(2) {
        if octet == b"00" {
            zero_run += 1;
            if zero_run >= 3 {
                return false;
            }
        } else {
            zero_run = 0;
        }
    }
    true
}

/// Decimal degrees with an integer part in (0, 180).
pub fn lonlat_filter(value: &mut String) -> bool {
    if !value.bytes().all(|b| b.is_ascii_digit() || b == b'.') {
        return false;
    }
    if value.bytes().filter(|&b| b == b'.').count() > 1 {
        return false;
    }
    let integer = value
        .bytes()
        .take_while(|&b| b != b'.')
        .fold(0u32, |acc, b| {
            acc.saturating_mul(10).saturating_add(u32::from(b - b'0'))
        });
    integer > 0 && integer < 180
}

/// IDFA/IDFV: 32 hex characters, or the hyphenated UUID layout.
pub fn idfx_filter(value: &mut String) -> bool {
    if !value.bytes().all(|b| b.is_ascii_hexdigit() || b == b'-') {
        return false;
    }
    if value.len() == 32 {
        return true;
    }
    let bytes = value.as_bytes();
    if bytes.len() < 24 {
        return false;
    }
    bytes[8] == b'-' && bytes[13] == b'-' && bytes[18] == b'-' && bytes[23] == b'-'
}

pub fn email_filter(value: &mut String) -> bool {
    value
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'@' | b'_' | b'-' | b'.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(filter: FilterFn, input: &str) -> (bool, String) {
        let mut value = input.to_string();
        let ok = filter(&mut value);
        (ok, value)
    }

    #[test]
    fn test_key_name_registry() {
        assert_eq!(KeyType::from_key_name("PHONENUM"), KeyType::Phone);
        assert_eq!(KeyType::from_key_name("COMPANY_PHONE"), KeyType::Phone);
        assert_eq!(KeyType::from_key_name("APP_IDFV"), KeyType::Idfx);
        assert_eq!(KeyType::from_key_name("WIFI_MAC"), KeyType::Mac);
        assert_eq!(KeyType::from_key_name("TO_LATITUDE"), KeyType::Latitude);
        assert_eq!(KeyType::from_key_name("APP_IDCARD"), KeyType::IdCard);
        assert_eq!(KeyType::from_key_name("ORDER_ID"), KeyType::Unknown);
        assert!(KeyType::IdCard.filter().is_none());
        assert!(KeyType::Unknown.filter().is_none());
        assert!(KeyType::Latitude.filter().is_some());
    }

    #[test]
    fn test_phone() {
        assert_eq!(check(phone_filter, "+86 138-0013-8000"), (true, "13800138000".into()));
        assert_eq!(check(phone_filter, "08613800138000"), (true, "13800138000".into()));
        assert!(check(phone_filter, "14512345678").0);
        assert!(!check(phone_filter, "14412345678").0);
        assert!(!check(phone_filter, "15412345678").0);
        assert!(check(phone_filter, "16612345678").0);
        assert!(!check(phone_filter, "16712345678").0);
        assert!(!check(phone_filter, "17912345678").0);
        assert!(check(phone_filter, "19912345678").0);
        assert!(!check(phone_filter, "19212345678").0);
        assert!(!check(phone_filter, "23800138000").0);
        assert!(check(phone_filter, "61234").0);
        assert!(!check(phone_filter, "60234").0);
        assert!(!check(phone_filter, "").0);
        assert!(!check(phone_filter, "abc").0);
    }

    #[test]
    fn test_imsi() {
        assert!(check(imsi_filter, "460087495038274").0);
        assert!(!check(imsi_filter, "460107495038274").0);
        assert!(check(imsi_filter, "310150123456789").0);
        assert!(!check(imsi_filter, "999150123456789").0);
        assert!(!check(imsi_filter, "46008749503827").0);
        assert!(!check(imsi_filter, "46008749503827a").0);
    }

    #[test]
    fn test_imei() {
        assert!(check(imei_filter, "99008749503827").0);
        assert!(check(imei_filter, "980087495038277").0);
        assert!(check(imei_filter, "A2008749503827").0);
        assert!(check(imei_filter, "35008749503827").0);
        assert!(!check(imei_filter, "A2008749503Z27").0);
        assert!(!check(imei_filter, "B2008749503827").0);
        assert!(!check(imei_filter, "35008749503827X").0);
        assert!(!check(imei_filter, "123").0);
    }

    #[test]
    fn test_mac() {
        assert_eq!(check(mac_filter, "a0:b1:c2:d3:e4:f5"), (true, "a0b1c2d3e4f5".into()));
        assert!(!check(mac_filter, "00-g0-00-00-00-00").0);
        assert_eq!(check(mac_filter, "0A-0B-0C-0D-0E-0F"), (true, "0a0b0c0d0e0f".into()));
        assert!(!check(mac_filter, "00:00:00:1a:2b:3c").0);
        assert!(check(mac_filter, "00:00:1a:00:2b:3c").0);
        assert!(check(mac_filter, "A0B1C2D3E4F5").0);
        assert!(!check(mac_filter, "a0b1c2").0);
    }

    #[test]
    fn test_lonlat() {
        assert!(check(lonlat_filter, "12.0001").0);
        assert!(!check(lonlat_filter, "190.0001").0);
        assert!(!check(lonlat_filter, "0.5").0);
        assert!(!check(lonlat_filter, "-12.5").0);
        assert!(!check(lonlat_filter, "12.5.1").0);
        assert!(check(lonlat_filter, "116").0);
    }

    #[test]
    fn test_idfx() {
        assert!(check(idfx_filter, "6D92078A-8246-4BA4-AE5B-76104861E7DC").0);
        assert!(check(idfx_filter, "6D92078A82464BA4AE5B76104861E7DC").0);
        assert!(!check(idfx_filter, "6D92078A-82464-BA4-AE5B-76104861E7D").0);
        assert!(!check(idfx_filter, "6D92078A-8246").0);
        assert!(!check(idfx_filter, "XYZ").0);
    }

    #[test]
    fn test_email() {
        assert!(check(email_filter, "yuyue2200@hotmail.com").0);
        assert!(check(email_filter, "first.last-x_y@example.org").0);
        assert!(!check(email_filter, "who am i@example.org").0);
        assert!(!check(email_filter, "<script>@example.org").0);
    }
}
