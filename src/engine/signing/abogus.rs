// Douyin `a_bogus` query signature
//
// SM3 digests of the query, the method and the RC4-scrambled user agent are packed with
// the request timestamps and a browser fingerprint, RC4 encrypted and encoded with a
// custom base64 alphabet. Values above 255 survive RC4 (the timestamp high word), so the
// whole pipeline works on u32 code units instead of bytes.

use rand::Rng;

use super::now_millis;

pub const DEFAULT_BROWSER: &str =
    "1536|742|1536|864|0|0|0|0|1536|864|1536|864|1536|742|24|24|Win32";

/// Alphabet for the user-agent digest
const UA_ALPHABET: &[u8; 64] = b"ckdp1h4ZKsUB80/Mfvw36XIgR25+WQAlEi7NLboqYTOPuzmFjJnryx9HVGDaStCe";
/// Alphabet for the final signature
pub const SIGN_ALPHABET: &[u8; 64] = b"Dkdpgh2ZmsQB80/MfvV36XI1R45-WUAlEixNLwoqYTOPuzKFjJnry79HbGcaStCe";

const SM3_IV: [u32; 8] = [
    1937774191, 1226093241, 388252375, 3666478592, 2842636476, 372324522, 3817729613,
    2969243214,
];

fn compress(reg: &[u32; 8], block: &[u8]) -> [u32; 8] {
    let mut w = [0u32; 132];
    for t in 0..16 {
        w[t] = u32::from_be_bytes([block[4 * t], block[4 * t + 1], block[4 * t + 2], block[4 * t + 3]]);
    }
    for t in 16..68 {
        let a = w[t - 16] ^ w[t - 9] ^ w[t - 3].rotate_left(15);
        let a = a ^ a.rotate_left(15) ^ a.rotate_left(23);
        w[t] = a ^ w[t - 13].rotate_left(7) ^ w[t - 6];
    }
    for t in 68..132 {
        w[t] = w[t - 68] ^ w[t - 64];
    }

    let mut v = *reg;
    for j in 0..64 {
        let tj: u32 = if j < 16 { 2043430169 } else { 2055708042 };
        let ss1 = v[0]
            .rotate_left(12)
            .wrapping_add(v[4])
            .wrapping_add(tj.rotate_left((j % 32) as u32))
            .rotate_left(7);
        let ss2 = ss1 ^ v[0].rotate_left(12);

        let (ff, gg) = if j < 16 {
            (v[0] ^ v[1] ^ v[2], v[4] ^ v[5] ^ v[6])
        } else {
            (
                (v[0] & v[1]) | (v[0] & v[2]) | (v[1] & v[2]),
                (v[4] & v[5]) | (!v[4] & v[6]),
            )
        };

        let tt1 = ff.wrapping_add(v[3]).wrapping_add(ss2).wrapping_add(w[j + 68]);
        let tt2 = gg.wrapping_add(v[7]).wrapping_add(ss1).wrapping_add(w[j]);

        v[3] = v[2];
        v[2] = v[1].rotate_left(9);
        v[1] = v[0];
        v[0] = tt1;
        v[7] = v[6];
        v[6] = v[5].rotate_left(19);
        v[5] = v[4];
        v[4] = tt2 ^ tt2.rotate_left(9) ^ tt2.rotate_left(17);
    }

    let mut out = [0u32; 8];
    for i in 0..8 {
        out[i] = reg[i] ^ v[i];
    }
    out
}

fn digest(reg: [u32; 8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    for (i, word) in reg.iter().enumerate() {
        out[4 * i..4 * i + 4].copy_from_slice(&word.to_be_bytes());
    }
    out
}

/// Pads `data` with 0x80, zeros up to `len_at` (mod 64) and a big-endian bit length of
/// `len_bytes` bytes, then compresses every block.
fn hash_padded(data: &[u8], len_at: usize, len_bytes: usize) -> [u8; 32] {
    let mut buf = data.to_vec();
    buf.push(0x80);
    while buf.len() % 64 != len_at {
        buf.push(0);
    }
    let bit_len = (data.len() as u64) * 8;
    buf.extend_from_slice(&bit_len.to_be_bytes()[8 - len_bytes..]);

    let mut reg = SM3_IV;
    for block in buf.chunks(64) {
        reg = compress(&reg, block);
    }
    digest(reg)
}

/// Standard SM3
pub fn sm3(data: &[u8]) -> [u8; 32] {
    hash_padded(data, 56, 8)
}

/// SM3 with a 4-byte length trailer, used for the user-agent digest
fn sm3_short_length(data: &[u8]) -> [u8; 32] {
    hash_padded(data, 60, 4)
}

fn sm3_double(text: &str) -> [u8; 32] {
    sm3(&sm3(text.as_bytes()))
}

fn rc4(plain: &[u32], key: &[u32]) -> Vec<u32> {
    let mut s: Vec<u32> = (0..256).collect();
    let mut j = 0usize;
    for i in 0..256 {
        j = (j + s[i] as usize + key[i % key.len()] as usize) % 256;
        s.swap(i, j);
    }
    let (mut i, mut j) = (0usize, 0usize);
    plain
        .iter()
        .map(|&p| {
            i = (i + 1) % 256;
            j = (j + s[i] as usize) % 256;
            s.swap(i, j);
            s[(s[i] as usize + s[j] as usize) % 256] ^ p
        })
        .collect()
}

fn units(text: &str) -> Vec<u32> {
    text.chars().map(|c| c as u32).collect()
}

/// Base64 over code units; a partial last group emits only its significant chars, then
/// `=` padding to a multiple of four
fn encode(input: &[u32], alphabet: &[u8; 64]) -> String {
    let mut out = String::with_capacity(input.len() / 3 * 4 + 4);
    for group in input.chunks(3) {
        let n = (group[0] << 16)
            | (group.get(1).copied().unwrap_or(0) << 8)
            | group.get(2).copied().unwrap_or(0);
        let emit = group.len() + 1;
        for shift in [18u32, 12, 6, 0].into_iter().take(emit) {
            let mask = 0x3Fu32 << shift;
            out.push(alphabet[((n & mask) >> shift) as usize] as char);
        }
    }
    while out.len() % 4 != 0 {
        out.push('=');
    }
    out
}

fn salt_group(r: u32, d: u32, e: u32, f: u32, g: u32) -> [u32; 4] {
    let low = r & 255;
    let high = r >> 8;
    [low & 170 | d, low & 85 | e, high & 170 | f, high & 85 | g]
}

/// Twelve random prefix units
fn random_salt() -> Vec<u32> {
    let mut rng = rand::thread_rng();
    let mut draw = || rng.gen_range(0..10000u32);
    let mut salt = Vec::with_capacity(12);
    salt.extend(salt_group(draw(), 1, 2, 5, 45 & 170));
    salt.extend(salt_group(draw(), 1, 0, 0, 0));
    salt.extend(salt_group(draw(), 1, 0, 5, 0));
    salt
}

pub struct ABogus {
    ua_code: [u8; 32],
    browser: Vec<u32>,
}

impl ABogus {
    pub fn new(user_agent: &str) -> Self {
        let scrambled = rc4(&units(user_agent), &[0, 1, 14]);
        let encoded = encode(&scrambled, UA_ALPHABET);
        Self {
            ua_code: sm3_short_length(encoded.as_bytes()),
            browser: units(DEFAULT_BROWSER),
        }
    }

    /// `a_bogus` value for a query string (without `?`)
    pub fn sign(&self, params: &str, method: &str) -> String {
        let start = now_millis().max(0) as u64;
        let end = start + rand::thread_rng().gen_range(4..=8);
        self.sign_at(params, method, start, end, &random_salt())
    }

    pub(crate) fn sign_at(&self, params: &str, method: &str, start: u64, end: u64, salt: &[u32]) -> String {
        let params_code = sm3_double(&format!("{}cus", params));
        let method_code = sm3_double(&format!("{}cus", method));
        let byte = |value: u64, shift: u32| ((value >> shift) & 255) as u32;

        let mut a: Vec<u32> = vec![
            44,
            byte(end, 24),
            0,
            0,
            0,
            0,
            24,
            params_code[21] as u32,
            method_code[21] as u32,
            0,
            self.ua_code[23] as u32,
            byte(end, 16),
            0,
            0,
            0,
            1,
            0,
            239,
            params_code[22] as u32,
            method_code[22] as u32,
            self.ua_code[24] as u32,
            byte(end, 8),
            0,
            0,
            0,
            0,
            byte(end, 0),
            0,
            0,
            14,
            byte(start, 24),
            byte(start, 16),
            0,
            byte(start, 8),
            byte(start, 0),
            3,
            (end >> 32) as u32,
            1,
            (start >> 32) as u32,
            1,
            self.browser.len() as u32,
            0,
            0,
            0,
        ];

        let check = a.iter().fold(0u32, |acc, v| acc ^ v);
        a.extend_from_slice(&self.browser);
        a.push(check);

        let mut payload = salt.to_vec();
        payload.extend(rc4(&a, &units("y")));
        encode(&payload, SIGN_ALPHABET)
    }
}

/// Sign `params` for a GET with `user_agent`
pub fn sign_douyin(params: &str, user_agent: &str) -> String {
    ABogus::new(user_agent).sign(params, "GET")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }

    #[test]
    fn test_sm3_reference_vector() {
        assert_eq!(
            hex(&sm3(b"abc")),
            "66c7f0f462eeedd9d1f2d46bdc10e4e24167c4875cf2f7a2297da02b8f4ba8e0"
        );
    }

    #[test]
    fn test_encode_partial_groups() {
        let alphabet = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
        assert_eq!(encode(&units("Man"), alphabet), "TWFu");
        assert_eq!(encode(&units("Ma"), alphabet), "TWE=");
        assert_eq!(encode(&units("M"), alphabet), "TQ==");
    }

    #[test]
    fn test_rc4_reference_vector() {
        let out: Vec<u32> = rc4(&units("Plaintext"), &units("Key"));
        let bytes: Vec<u8> = out.iter().map(|&v| v as u8).collect();
        assert_eq!(hex(&bytes), "bbf316e8d940af0ad3");
    }

    #[test]
    fn test_signature_shape() {
        let signer = ABogus::new(crate::engine::transport::DESKTOP_UA);
        let salt = [1u32; 12];
        let params = "device_platform=webapp&aid=6383&aweme_id=7300000000000000001";
        let a = signer.sign_at(params, "GET", 1_700_000_000_000, 1_700_000_000_005, &salt);
        let b = signer.sign_at(params, "GET", 1_700_000_000_000, 1_700_000_000_005, &salt);
        assert_eq!(a, b);
        assert_eq!(
            a,
            "DfgkDfgkDfgkDfgk56KLfY3q6RRVY/xI0SVkMD2fZPp0qL39HMYh9exoIBGvXY8jwG/-Ieujy4hbT3ohrQ2y0Hwf9W0L/25ksDSkKl5Q5xSSs1X9eghgJ04qmkt5SMx2RvB-rOXmqhZHKRbp09oHmhK4bIOwu3GM5f=="
        );

        let units_len = 12 + 44 + DEFAULT_BROWSER.len() + 1;
        assert_eq!(a.len(), (units_len + 2) / 3 * 4);
        assert!(a
            .bytes()
            .all(|c| c == b'=' || SIGN_ALPHABET.contains(&c)));

        let other = signer.sign_at("aweme_id=1", "GET", 1_700_000_000_000, 1_700_000_000_005, &salt);
        assert_ne!(a, other);
    }

    #[test]
    fn test_live_signature() {
        let salt = random_salt();
        assert_eq!(salt.len(), 12);
        assert!(salt.iter().all(|&v| v < 256));
        let signer = ABogus::new("Mozilla/5.0");
        assert_eq!(signer.sign("aweme_id=1", "GET").len(), 164);
    }
}
