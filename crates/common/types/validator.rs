use neorex_crypto::{sha256, PublicKeyBytes};

use super::UInt160;

// NeoVM opcodes used by the standard verification contracts.
const OP_PUSHDATA1: u8 = 0x0c;
const OP_PUSH0: u8 = 0x10;
const OP_SYSCALL: u8 = 0x41;

/// Interop service id: first four bytes of `sha256(name)`, appended to
/// `SYSCALL` verbatim.
fn interop_id(name: &str) -> [u8; 4] {
    let digest = sha256(name.as_bytes());
    [digest[0], digest[1], digest[2], digest[3]]
}

fn check_sig_id() -> [u8; 4] {
    interop_id("System.Crypto.CheckSig")
}

fn check_multisig_id() -> [u8; 4] {
    interop_id("System.Crypto.CheckMultisig")
}

/// Builds the standard single-signature verification script.
pub fn single_sig_script(key: &PublicKeyBytes) -> Vec<u8> {
    let mut script = Vec::with_capacity(40);
    script.push(OP_PUSHDATA1);
    script.push(33);
    script.extend_from_slice(key);
    script.push(OP_SYSCALL);
    script.extend_from_slice(&check_sig_id());
    script
}

/// Builds the standard `m`-of-`n` multi-signature verification script.
/// Keys are pushed in ascending byte order so every node derives the same
/// script for the same committee. `m` and `n` must fit the PUSH1..PUSH16
/// range.
pub fn multi_sig_script(m: usize, keys: &[PublicKeyBytes]) -> Option<Vec<u8>> {
    let n = keys.len();
    if m == 0 || m > n || n > 16 {
        return None;
    }
    let mut sorted = keys.to_vec();
    sorted.sort();

    let mut script = Vec::with_capacity(2 + n * 35 + 7);
    script.push(OP_PUSH0 + m as u8);
    for key in &sorted {
        script.push(OP_PUSHDATA1);
        script.push(33);
        script.extend_from_slice(key);
    }
    script.push(OP_PUSH0 + n as u8);
    script.push(OP_SYSCALL);
    script.extend_from_slice(&check_multisig_id());
    Some(script)
}

/// Shape of a recognized standard verification script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationContract {
    SingleSig(PublicKeyBytes),
    MultiSig { m: usize, keys: Vec<PublicKeyBytes> },
}

/// Recognizes the two standard verification-script shapes. Anything else is
/// a deployed-contract verification and outside this parser's business.
pub fn parse_verification_script(script: &[u8]) -> Option<VerificationContract> {
    // Single-sig: PUSHDATA1 33 <key> SYSCALL <CheckSig>
    if script.len() == 40
        && script[0] == OP_PUSHDATA1
        && script[1] == 33
        && script[35] == OP_SYSCALL
        && script[36..40] == check_sig_id()
    {
        let mut key = [0u8; 33];
        key.copy_from_slice(&script[2..35]);
        return Some(VerificationContract::SingleSig(key));
    }

    // Multi-sig: PUSH<m> (PUSHDATA1 33 <key>)+ PUSH<n> SYSCALL <CheckMultisig>
    let m = script.first().map(|op| op.wrapping_sub(OP_PUSH0))?;
    if !(1..=16).contains(&m) {
        return None;
    }
    let mut keys = Vec::new();
    let mut pos = 1;
    while pos + 35 <= script.len() && script[pos] == OP_PUSHDATA1 && script[pos + 1] == 33 {
        let mut key = [0u8; 33];
        key.copy_from_slice(&script[pos + 2..pos + 35]);
        keys.push(key);
        pos += 35;
    }
    let n = keys.len();
    if n == 0 || n > 16 || usize::from(m) > n {
        return None;
    }
    let tail = &script[pos..];
    if tail.len() != 6
        || tail[0] != OP_PUSH0 + n as u8
        || tail[1] != OP_SYSCALL
        || tail[2..6] != check_multisig_id()
    {
        return None;
    }
    Some(VerificationContract::MultiSig {
        m: usize::from(m),
        keys,
    })
}

/// The committee address blocks commit to as `next_consensus`: the
/// `M`-of-`N` multi-sig script hash over the validator keys.
pub fn next_consensus_address(validators: &[PublicKeyBytes]) -> Option<UInt160> {
    let set = ValidatorSet::new(validators.to_vec());
    let script = multi_sig_script(set.quorum(), set.keys())?;
    Some(UInt160::hash160_of(&script))
}

/// The ordered validator committee for one height.
///
/// Keys are held sorted ascending; `N` is fixed per network, `M` is the
/// BFT quorum, `f` the tolerated fault count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorSet {
    keys: Vec<PublicKeyBytes>,
}

impl ValidatorSet {
    pub fn new(mut keys: Vec<PublicKeyBytes>) -> Self {
        keys.sort();
        keys.dedup();
        Self { keys }
    }

    pub fn keys(&self) -> &[PublicKeyBytes] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Tolerated byzantine validators: `floor((N-1)/3)`.
    pub fn fault_tolerance(&self) -> usize {
        self.keys.len().saturating_sub(1) / 3
    }

    /// Quorum `M = N - f`.
    pub fn quorum(&self) -> usize {
        self.keys.len() - self.fault_tolerance()
    }

    /// Primary for `(height, view)`: `(h - v) mod N`.
    pub fn primary_index(&self, height: u32, view: u8) -> u8 {
        let n = self.keys.len() as u64;
        if n == 0 {
            return 0;
        }
        let h = u64::from(height);
        let v = u64::from(view) % n;
        ((h + n - v) % n) as u8
    }

    pub fn index_of(&self, key: &PublicKeyBytes) -> Option<u8> {
        self.keys.iter().position(|k| k == key).map(|i| i as u8)
    }

    pub fn get(&self, index: u8) -> Option<&PublicKeyBytes> {
        self.keys.get(usize::from(index))
    }

    pub fn next_consensus(&self) -> Option<UInt160> {
        let script = multi_sig_script(self.quorum(), &self.keys)?;
        Some(UInt160::hash160_of(&script))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use neorex_crypto::KeyPair;

    fn keys(n: usize) -> Vec<PublicKeyBytes> {
        (0..n).map(|_| KeyPair::generate().public_key()).collect()
    }

    #[test]
    fn quorum_math() {
        for (n, f, m) in [(1, 0, 1), (4, 1, 3), (7, 2, 5), (10, 3, 7), (21, 6, 15)] {
            let set = ValidatorSet::new(keys(n));
            assert_eq!(set.fault_tolerance(), f, "f for n={n}");
            assert_eq!(set.quorum(), m, "m for n={n}");
        }
    }

    #[test]
    fn primary_rotates_with_view() {
        let set = ValidatorSet::new(keys(4));
        let h = 10;
        assert_eq!(set.primary_index(h, 0), (10 % 4) as u8);
        assert_eq!(set.primary_index(h, 1), (9 % 4) as u8);
        // View beyond N wraps.
        assert_eq!(set.primary_index(h, 5), set.primary_index(h, 1));
    }

    #[test]
    fn primary_handles_small_heights() {
        let set = ValidatorSet::new(keys(4));
        // h - v would underflow unsigned math naively.
        assert_eq!(set.primary_index(0, 3), ((0u64 + 4 - 3) % 4) as u8);
    }

    #[test]
    fn single_sig_script_parses_back() {
        let key = KeyPair::generate().public_key();
        let script = single_sig_script(&key);
        assert_eq!(script.len(), 40);
        assert_eq!(
            parse_verification_script(&script),
            Some(VerificationContract::SingleSig(key))
        );
    }

    #[test]
    fn multi_sig_script_parses_back() {
        let committee = keys(4);
        let script = multi_sig_script(3, &committee).expect("valid shape");
        match parse_verification_script(&script) {
            Some(VerificationContract::MultiSig { m, keys: parsed }) => {
                assert_eq!(m, 3);
                let mut sorted = committee.clone();
                sorted.sort();
                assert_eq!(parsed, sorted);
            }
            other => panic!("unexpected parse {other:?}"),
        }
    }

    #[test]
    fn multi_sig_rejects_bad_parameters() {
        assert!(multi_sig_script(0, &keys(4)).is_none());
        assert!(multi_sig_script(5, &keys(4)).is_none());
        assert!(multi_sig_script(1, &keys(17)).is_none());
    }

    #[test]
    fn garbage_scripts_are_not_standard() {
        assert_eq!(parse_verification_script(&[]), None);
        assert_eq!(parse_verification_script(&[0x40, 0x41, 0x42]), None);
        // Truncated single-sig.
        let key = KeyPair::generate().public_key();
        let script = single_sig_script(&key);
        assert_eq!(parse_verification_script(&script[..39]), None);
    }

    #[test]
    fn next_consensus_is_order_independent() {
        let committee = keys(4);
        let mut shuffled = committee.clone();
        shuffled.reverse();
        assert_eq!(
            ValidatorSet::new(committee).next_consensus(),
            ValidatorSet::new(shuffled).next_consensus()
        );
    }
}
