//! Capability negotiation between a dapp's request and a wallet's offer.

use crate::identity::{ChainId, ChainMethods, DappIdentity, WalletIdentity};
use std::collections::BTreeSet;

/// The chains and methods both parties agreed on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Per chain, the methods requested by the dapp that the wallet supports.
    /// Chains with an empty intersection are omitted.
    pub chains: ChainMethods,
    /// Chains the dapp marked as required that the wallet does not serve.
    pub missing_required: BTreeSet<ChainId>,
}

impl Capabilities {
    /// Intersect the dapp's requested chains with the wallet's supported chains.
    pub fn negotiate(dapp: &DappIdentity, wallet: &WalletIdentity) -> Self {
        let mut chains = ChainMethods::new();
        for (chain, requested) in &dapp.requested_chains {
            let Some(supported) = wallet.supported_chains.get(chain) else {
                continue;
            };
            let common: BTreeSet<_> = requested.intersection(supported).cloned().collect();
            if !common.is_empty() {
                chains.insert(*chain, common);
            }
        }

        let missing_required = dapp
            .required_chains
            .iter()
            .flatten()
            .filter(|chain| !wallet.supported_chains.contains_key(*chain))
            .copied()
            .collect();

        Self {
            chains,
            missing_required,
        }
    }

    /// Whether `method` may be used on `chain`.
    pub fn allows(&self, chain: ChainId, method: &str) -> bool {
        self.chains
            .get(&chain)
            .is_some_and(|methods| methods.contains(method))
    }

    /// True when every required chain is served by the wallet.
    pub fn is_satisfied(&self) -> bool {
        self.missing_required.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negotiate_intersects_methods() {
        let dapp = DappIdentity::new("A")
            .with_chain(1, ["kr_sign", "kr_identities"])
            .with_chain(10, ["kr_sign"]);
        let wallet = WalletIdentity::new("B")
            .with_chain(1, ["kr_sign"])
            .with_chain(137, ["kr_sign"]);

        let caps = Capabilities::negotiate(&dapp, &wallet);
        assert!(caps.allows(1, "kr_sign"));
        assert!(!caps.allows(1, "kr_identities"));
        assert!(!caps.allows(10, "kr_sign"));
        assert!(!caps.allows(137, "kr_sign"));
        assert_eq!(caps.chains.len(), 1);
        assert!(caps.is_satisfied());
    }

    #[test]
    fn test_missing_required_chain() {
        let dapp = DappIdentity::new("A")
            .with_chain(1, ["m"])
            .require_chain(1)
            .require_chain(5);
        let wallet = WalletIdentity::new("B").with_chain(1, ["m"]);

        let caps = Capabilities::negotiate(&dapp, &wallet);
        assert!(!caps.is_satisfied());
        assert_eq!(caps.missing_required.into_iter().collect::<Vec<_>>(), vec![5]);
    }
}
