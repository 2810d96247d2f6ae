// Xiaohongshu web API signature headers (x-s, x-t, x-s-common) and the anonymous
// a1/webId cookie pair

use base64::alphabet::Alphabet;
use base64::engine::general_purpose::{GeneralPurpose, PAD};
use base64::Engine as _;
use lazy_static::lazy_static;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::Value;

use super::now_millis;

const XS_ALPHABET: &[u8; 65] = b"A4NjFqYu5wPHsO0XTdDgMa2r1ZQocVte9UJBvk6/7=yRnhISGKblCWi+LpfE8xzm3";
const COMMON_ALPHABET: &str = "ZmserbBoHQtNP+wOcza/LpngG8yJq42KWYj0DSfdikx3VT16IlUAFM97hECvuRX5";
const MRC_XOR: i64 = 3988292384;

const fn crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut n = 0;
    while n < 256 {
        let mut c = n as u32;
        let mut k = 0;
        while k < 8 {
            c = if c & 1 != 0 { 0xEDB8_8320 ^ (c >> 1) } else { c >> 1 };
            k += 1;
        }
        table[n] = c;
        n += 1;
    }
    table
}

static CRC_TABLE: [u32; 256] = crc_table();

lazy_static! {
    static ref COMMON_ENGINE: GeneralPurpose =
        GeneralPurpose::new(&Alphabet::new(COMMON_ALPHABET).unwrap(), PAD);
}

fn crc_step(crc: u32, byte: u8) -> u32 {
    CRC_TABLE[((crc ^ byte as u32) & 255) as usize] ^ (crc >> 8)
}

/// Plain CRC-32 (zlib)
pub fn crc32(data: &[u8]) -> u32 {
    !data.iter().fold(0xFFFF_FFFF, |crc, &b| crc_step(crc, b))
}

/// CRC variant over the first 57 bytes of `x-t + x-s`, signed result
fn mrc(text: &str) -> i64 {
    let crc = text.as_bytes().iter().take(57).fold(0xFFFF_FFFFu32, |crc, &b| crc_step(crc, b));
    !(crc as i64) ^ MRC_XOR
}

/// Custom base64 of a 32-char md5 hex digest (44 chars)
fn encode_digest(hex: &str) -> String {
    let bytes = hex.as_bytes();
    let at = |i: usize| bytes.get(i).copied().unwrap_or(0) as usize;
    let mut out = String::with_capacity(44);
    for i in (0..32).step_by(3) {
        let (o, g, h) = (at(i), at(i + 1), at(i + 2));
        let v = o >> 2;
        let x = ((o & 3) << 4) | (g >> 4);
        let mut p = ((g & 15) << 2) | (h >> 6);
        let mut b = if h != 0 { h & 63 } else { 64 };
        if g == 0 {
            p = 64;
            b = 64;
        }
        for idx in [v, x, p, b] {
            out.push(XS_ALPHABET[idx] as char);
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XhsSignature {
    pub x_s: String,
    pub x_t: String,
    pub x_s_common: String,
}

impl XhsSignature {
    pub fn headers(&self) -> [(&'static str, &str); 3] {
        [
            ("x-s", self.x_s.as_str()),
            ("x-t", self.x_t.as_str()),
            ("x-s-common", self.x_s_common.as_str()),
        ]
    }
}

/// Sign `uri` (path plus query) and an optional JSON body
pub fn sign(uri: &str, body: Option<&Value>, a1: &str, b1: &str) -> XhsSignature {
    sign_at(uri, body, a1, b1, now_millis())
}

pub(crate) fn sign_at(uri: &str, body: Option<&Value>, a1: &str, b1: &str, millis: i64) -> XhsSignature {
    let body = body.map(Value::to_string).unwrap_or_default();
    let digest = format!("{:x}", md5::compute(format!("{}test{}{}", millis, uri, body)));
    let x_s = encode_digest(&digest);
    let x_t = millis.to_string();

    // key order is part of the signature, so the object is written by hand
    let quoted = |s: &str| Value::String(s.to_string()).to_string();
    let common = format!(
        concat!(
            r#"{{"s0":5,"s1":"","x0":"1","x1":"3.2.0","x2":"Windows","x3":"xhs-pc-web","#,
            r#""x4":"2.3.1","x5":{},"x6":{},"x7":{},"x8":{},"x9":{},"x10":1}}"#
        ),
        quoted(a1),
        quoted(&x_t),
        quoted(&x_s),
        quoted(b1),
        mrc(&format!("{}{}", x_t, x_s)),
    );

    XhsSignature {
        x_s_common: COMMON_ENGINE.encode(common.as_bytes()),
        x_s,
        x_t,
    }
}

fn a1_from(millis: i64, random: &str) -> String {
    let seed = format!("{:x}{}50000", millis, random);
    let mut a1 = format!("{}{}", seed, crc32(seed.as_bytes()));
    a1.truncate(52);
    a1
}

/// Fresh anonymous `(a1, webId)` cookie values
pub fn generate_a1() -> (String, String) {
    let random: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(30)
        .map(char::from)
        .collect();
    let a1 = a1_from(now_millis(), &random);
    let web_id = format!("{:x}", md5::compute(a1.as_bytes()));
    (a1, web_id)
}
