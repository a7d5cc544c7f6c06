//! Recovery bundling: everything this node has observed for the current
//! `(height, view)`, shipped to a validator that fell behind. The receiver
//! re-validates each bundled envelope exactly as if it had arrived alone.

use neorex_p2p::payloads::ExtensiblePayload;

use crate::context::ConsensusContext;
use crate::messages::ConsensusMessageBody;

/// Collects the observed payloads worth replaying: change views, the
/// accepted PrepareRequest, the PrepareResponses, and the commits.
pub fn build_recovery_message(context: &ConsensusContext) -> Option<ConsensusMessageBody> {
    let mut payloads: Vec<ExtensiblePayload> = Vec::new();

    for entry in context.change_views.iter().flatten() {
        payloads.push(entry.1.clone());
    }
    for payload in context.preparations.iter().flatten() {
        payloads.push(payload.clone());
    }
    for record in context.commits.iter().flatten() {
        payloads.push(record.payload.clone());
    }

    if payloads.is_empty() {
        None
    } else {
        Some(ConsensusMessageBody::RecoveryMessage { payloads })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CommitRecord;
    use crate::messages::ConsensusMessage;
    use neorex_common::types::{Header, ValidatorSet};
    use neorex_crypto::KeyPair;

    #[test]
    fn empty_context_yields_no_recovery() {
        let context = ConsensusContext::new(ValidatorSet::new(Vec::new()), None);
        assert!(build_recovery_message(&context).is_none());
    }

    #[test]
    fn bundles_observed_payloads() {
        let keypairs: Vec<KeyPair> = (0..4).map(|_| KeyPair::generate()).collect();
        let validators = ValidatorSet::new(keypairs.iter().map(KeyPair::public_key).collect());
        let mut context = ConsensusContext::new(validators, Some(keypairs[0].public_key()));
        context.reset(&Header::default());

        let envelope = |v: u8| {
            ConsensusMessage {
                block_index: 1,
                validator_index: v,
                view_number: 0,
                body: ConsensusMessageBody::RecoveryRequest { timestamp: 0 },
            }
            .into_envelope(0, &keypairs[v as usize])
        };
        context.preparations[1] = Some(envelope(1));
        context.commits[2] = Some(CommitRecord {
            signature: [0u8; 64],
            payload: envelope(2),
        });
        context.change_views[3] = Some((1, envelope(3)));

        match build_recovery_message(&context) {
            Some(ConsensusMessageBody::RecoveryMessage { payloads }) => {
                assert_eq!(payloads.len(), 3);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
