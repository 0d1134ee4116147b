use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use gridx_core::config::EscrowSection;
use gridx_core::currency::{Amount, Currency};
use gridx_core::error::GridxError;
use gridx_core::escrow::{
    EscrowContract, EscrowDispute, EscrowStatus, EscrowTransaction, EscrowType, TransactionKind,
};
use gridx_core::types::{ContractId, Timestamp};
use gridx_store::Store;

/// Address the contract's funds notionally sit at between funding and
/// settlement. A label, not a chain address: the chain side is the caller's
/// concern.
const ESCROW_ADDRESS: &str = "escrow_address";

/// Aggregate escrow figures, per currency where amounts are involved.
#[derive(Debug, Clone, Serialize)]
pub struct EscrowStats {
    pub total_contracts: usize,
    pub status_counts: BTreeMap<String, usize>,
    /// Sum of completed contract amounts, as decimal strings keyed by symbol.
    pub completed_volume: BTreeMap<String, String>,
    /// Community-fund take so far, as decimal strings keyed by symbol.
    pub community_fund: BTreeMap<String, String>,
    pub success_rate: f64,
}

/// The escrow state machine.
pub struct EscrowService {
    store: Arc<Store>,
    community_share_bp: u32,
    community_fund_destination: String,
    supported: BTreeSet<Currency>,
}

impl EscrowService {
    pub fn new(store: Arc<Store>, config: EscrowSection, supported: Vec<Currency>) -> Self {
        Self {
            store,
            community_share_bp: config.community_share_bp,
            community_fund_destination: config.community_fund_destination,
            supported: supported.into_iter().collect(),
        }
    }

    pub fn community_share_bp(&self) -> u32 {
        self.community_share_bp
    }

    fn conflict(contract: &EscrowContract, expected: &str) -> GridxError {
        GridxError::TransitionConflict {
            entity: "contract",
            id: contract.contract_id.to_string(),
            expected: expected.into(),
            actual: contract.status.to_string(),
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Create a contract in `pending`. Funds are not touched yet.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        &self,
        escrow_type: EscrowType,
        buyer_id: &str,
        seller_id: &str,
        amount: Amount,
        service_id: Option<String>,
        description: &str,
        terms: &str,
        now: Timestamp,
    ) -> Result<EscrowContract, GridxError> {
        if buyer_id.is_empty() || seller_id.is_empty() {
            return Err(GridxError::EmptyNodeId);
        }
        if amount.is_zero() {
            return Err(GridxError::ZeroAmount);
        }
        if !self.supported.contains(&amount.currency()) {
            return Err(GridxError::UnsupportedCurrency(
                amount.currency().symbol().to_string(),
            ));
        }
        let contract = EscrowContract {
            contract_id: ContractId::generate(),
            escrow_type,
            buyer_id: buyer_id.to_string(),
            seller_id: seller_id.to_string(),
            amount,
            service_id,
            description: description.to_string(),
            terms: terms.to_string(),
            status: EscrowStatus::Pending,
            dispute_reason: None,
            created_at: now,
            updated_at: now,
            funded_at: None,
            started_at: None,
            completed_at: None,
        };
        self.store.put_escrow(&contract)?;
        info!(contract_id = %contract.contract_id, amount = %contract.amount, "escrow contract created");
        Ok(contract)
    }

    /// `pending → funded`, recording the single funding transaction.
    pub fn fund(
        &self,
        contract_id: &ContractId,
        tx_hash: &str,
        now: Timestamp,
    ) -> Result<EscrowContract, GridxError> {
        let current = self.get(contract_id)?;
        let funding = EscrowTransaction {
            transaction_id: Uuid::new_v4(),
            contract_id: *contract_id,
            kind: TransactionKind::Funding,
            amount: current.amount,
            from_address: format!("buyer_{}", current.buyer_id),
            to_address: ESCROW_ADDRESS.into(),
            tx_hash: tx_hash.to_string(),
            status: "confirmed".into(),
            created_at: now,
        };
        let contract = self.store.update_escrow_with_txs(
            contract_id,
            |c| {
                if c.status != EscrowStatus::Pending {
                    return Err(Self::conflict(c, "pending"));
                }
                c.status = EscrowStatus::Funded;
                c.funded_at = Some(now);
                c.updated_at = now;
                Ok(())
            },
            std::slice::from_ref(&funding),
        )?;
        info!(contract_id = %contract_id, tx_hash = %tx_hash, "escrow funded");
        Ok(contract)
    }

    /// `funded → in_progress`.
    pub fn start(
        &self,
        contract_id: &ContractId,
        now: Timestamp,
    ) -> Result<EscrowContract, GridxError> {
        let contract = self.store.update_escrow(contract_id, |c| {
            if c.status != EscrowStatus::Funded {
                return Err(Self::conflict(c, "funded"));
            }
            c.status = EscrowStatus::InProgress;
            c.started_at = Some(now);
            c.updated_at = now;
            Ok(())
        })?;
        info!(contract_id = %contract_id, "escrow work started");
        Ok(contract)
    }

    /// `in_progress → completed`. Atomically records the seller payment and
    /// the community-fund share; the two always sum exactly to the amount.
    pub fn complete(
        &self,
        contract_id: &ContractId,
        tx_hash: &str,
        now: Timestamp,
    ) -> Result<EscrowContract, GridxError> {
        let current = self.get(contract_id)?;
        let (seller_amount, community_amount) =
            current.amount.settlement_split(self.community_share_bp);
        let mk_tx = |kind, amount, to_address: String| EscrowTransaction {
            transaction_id: Uuid::new_v4(),
            contract_id: *contract_id,
            kind,
            amount,
            from_address: ESCROW_ADDRESS.into(),
            to_address,
            tx_hash: tx_hash.to_string(),
            status: "confirmed".into(),
            created_at: now,
        };
        let txs = [
            mk_tx(
                TransactionKind::SellerPayment,
                seller_amount,
                format!("seller_{}", current.seller_id),
            ),
            mk_tx(
                TransactionKind::CommunityFund,
                community_amount,
                self.community_fund_destination.clone(),
            ),
        ];
        let contract = self.store.update_escrow_with_txs(
            contract_id,
            |c| {
                if c.status != EscrowStatus::InProgress {
                    return Err(Self::conflict(c, "in_progress"));
                }
                c.status = EscrowStatus::Completed;
                c.completed_at = Some(now);
                c.updated_at = now;
                Ok(())
            },
            &txs,
        )?;
        info!(
            contract_id = %contract_id,
            seller = %seller_amount,
            community = %community_amount,
            "escrow settled"
        );
        Ok(contract)
    }

    /// Any non-terminal state → `disputed`, with a dispute record. No funds
    /// move; resolution happens through `refund` or stays with an operator.
    pub fn dispute(
        &self,
        contract_id: &ContractId,
        initiator_id: &str,
        reason: &str,
        evidence: Option<String>,
        now: Timestamp,
    ) -> Result<EscrowContract, GridxError> {
        let dispute = EscrowDispute {
            dispute_id: Uuid::new_v4(),
            contract_id: *contract_id,
            initiator_id: initiator_id.to_string(),
            reason: reason.to_string(),
            evidence,
            status: "open".into(),
            resolution: None,
            created_at: now,
            resolved_at: None,
        };
        let reason_owned = reason.to_string();
        let contract = self.store.update_escrow_with_dispute(
            contract_id,
            |c| {
                if c.status.is_terminal() {
                    return Err(GridxError::InvalidTransition {
                        entity: "contract",
                        id: c.contract_id.to_string(),
                        op: "dispute",
                        from: c.status.to_string(),
                    });
                }
                c.status = EscrowStatus::Disputed;
                c.dispute_reason = Some(reason_owned.clone());
                c.updated_at = now;
                Ok(())
            },
            &dispute,
        )?;
        info!(contract_id = %contract_id, initiator = %initiator_id, "escrow disputed");
        Ok(contract)
    }

    /// `disputed → refunded` (administratively also from `funded` or
    /// `in_progress`): one refund transaction returns the full amount.
    pub fn refund(
        &self,
        contract_id: &ContractId,
        tx_hash: &str,
        now: Timestamp,
    ) -> Result<EscrowContract, GridxError> {
        let current = self.get(contract_id)?;
        let refund = EscrowTransaction {
            transaction_id: Uuid::new_v4(),
            contract_id: *contract_id,
            kind: TransactionKind::Refund,
            amount: current.amount,
            from_address: ESCROW_ADDRESS.into(),
            to_address: format!("buyer_{}", current.buyer_id),
            tx_hash: tx_hash.to_string(),
            status: "confirmed".into(),
            created_at: now,
        };
        let contract = self.store.update_escrow_with_txs(
            contract_id,
            |c| {
                match c.status {
                    EscrowStatus::Disputed | EscrowStatus::Funded | EscrowStatus::InProgress => {}
                    _ => return Err(Self::conflict(c, "disputed|funded|in_progress")),
                }
                c.status = EscrowStatus::Refunded;
                c.updated_at = now;
                Ok(())
            },
            std::slice::from_ref(&refund),
        )?;
        info!(contract_id = %contract_id, tx_hash = %tx_hash, "escrow refunded");
        Ok(contract)
    }

    /// `pending → cancelled`. Nothing was funded, so nothing moves.
    pub fn cancel(
        &self,
        contract_id: &ContractId,
        now: Timestamp,
    ) -> Result<EscrowContract, GridxError> {
        let contract = self.store.update_escrow(contract_id, |c| {
            if c.status != EscrowStatus::Pending {
                return Err(Self::conflict(c, "pending"));
            }
            c.status = EscrowStatus::Cancelled;
            c.updated_at = now;
            Ok(())
        })?;
        info!(contract_id = %contract_id, "escrow cancelled");
        Ok(contract)
    }

    // ── Reads ────────────────────────────────────────────────────────────────

    pub fn get(&self, contract_id: &ContractId) -> Result<EscrowContract, GridxError> {
        self.store
            .get_escrow(contract_id)?
            .ok_or_else(|| GridxError::ContractNotFound(contract_id.to_string()))
    }

    pub fn transactions(
        &self,
        contract_id: &ContractId,
    ) -> Result<Vec<EscrowTransaction>, GridxError> {
        self.store.iter_txs_for_contract(contract_id)
    }

    pub fn disputes(&self, contract_id: &ContractId) -> Result<Vec<EscrowDispute>, GridxError> {
        self.store.iter_disputes_for_contract(contract_id)
    }

    /// Contracts where `user_id` is buyer or seller, newest first.
    pub fn list_by_user(
        &self,
        user_id: &str,
        status: Option<EscrowStatus>,
    ) -> Result<Vec<EscrowContract>, GridxError> {
        let mut out: Vec<EscrowContract> = self
            .store
            .iter_escrows()?
            .into_iter()
            .filter(|c| c.buyer_id == user_id || c.seller_id == user_id)
            .filter(|c| status.map(|s| c.status == s).unwrap_or(true))
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    pub fn statistics(&self) -> Result<EscrowStats, GridxError> {
        let contracts = self.store.iter_escrows()?;
        let mut status_counts: BTreeMap<String, usize> = BTreeMap::new();
        let mut completed_units: BTreeMap<Currency, u128> = BTreeMap::new();
        for c in &contracts {
            *status_counts.entry(c.status.as_str().to_string()).or_default() += 1;
            if c.status == EscrowStatus::Completed {
                *completed_units.entry(c.amount.currency()).or_default() += c.amount.units();
            }
        }
        let mut community_units: BTreeMap<Currency, u128> = BTreeMap::new();
        for tx in self.store.iter_all_txs()? {
            if tx.kind == TransactionKind::CommunityFund && tx.status == "confirmed" {
                *community_units.entry(tx.amount.currency()).or_default() += tx.amount.units();
            }
        }
        let to_decimal = |units: BTreeMap<Currency, u128>| {
            units
                .into_iter()
                .map(|(c, u)| {
                    (c.symbol().to_string(), Amount::from_units(u, c).to_decimal_string())
                })
                .collect()
        };
        let total = contracts.len();
        let completed = status_counts.get("completed").copied().unwrap_or(0);
        Ok(EscrowStats {
            total_contracts: total,
            status_counts,
            completed_volume: to_decimal(completed_units),
            community_fund: to_decimal(community_units),
            success_rate: if total > 0 { completed as f64 / total as f64 * 100.0 } else { 0.0 },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_service(tag: &str) -> (EscrowService, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!("gridx_escrow_{tag}_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let store = Arc::new(Store::open(&dir).unwrap());
        let service = EscrowService::new(
            store,
            EscrowSection::default(),
            Currency::ALL.to_vec(),
        );
        (service, dir)
    }

    fn flop(s: &str) -> Amount {
        Amount::parse(s, Currency::Flop).unwrap()
    }

    fn create_simple(service: &EscrowService, amount: &str) -> EscrowContract {
        service
            .create(
                EscrowType::ServicePayment,
                "b1",
                "s1",
                flop(amount),
                Some("service-123".into()),
                "API usage payment",
                "Payment for 100 API calls",
                1_700_000_000,
            )
            .unwrap()
    }

    #[test]
    fn happy_path_settles_with_95_5_split() {
        let (service, dir) = temp_service("happy");
        let contract = create_simple(&service, "10.00");
        assert_eq!(contract.status, EscrowStatus::Pending);

        let funded = service.fund(&contract.contract_id, "TXF", 1_700_000_010).unwrap();
        assert_eq!(funded.status, EscrowStatus::Funded);
        assert_eq!(funded.funded_at, Some(1_700_000_010));

        let started = service.start(&contract.contract_id, 1_700_000_020).unwrap();
        assert_eq!(started.status, EscrowStatus::InProgress);

        let completed = service.complete(&contract.contract_id, "TXC", 1_700_000_030).unwrap();
        assert_eq!(completed.status, EscrowStatus::Completed);
        assert_eq!(completed.completed_at, Some(1_700_000_030));

        let txs = service.transactions(&contract.contract_id).unwrap();
        assert_eq!(txs.len(), 3); // funding + seller payment + community fund

        let seller: Vec<_> = txs.iter().filter(|t| t.kind == TransactionKind::SellerPayment).collect();
        let community: Vec<_> = txs.iter().filter(|t| t.kind == TransactionKind::CommunityFund).collect();
        assert_eq!(seller.len(), 1);
        assert_eq!(community.len(), 1);
        assert_eq!(seller[0].amount.to_decimal_string(), "9.50000000");
        assert_eq!(seller[0].to_address, "seller_s1");
        assert_eq!(community[0].amount.to_decimal_string(), "0.50000000");
        assert_eq!(community[0].to_address, "community_fund");
        assert_eq!(
            seller[0].amount.units() + community[0].amount.units(),
            contract.amount.units()
        );
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn double_fund_conflicts_and_changes_nothing() {
        let (service, dir) = temp_service("double_fund");
        let contract = create_simple(&service, "10.00");
        service.fund(&contract.contract_id, "TXF", 1_700_000_010).unwrap();

        let err = service.fund(&contract.contract_id, "TXF2", 1_700_000_020).unwrap_err();
        assert!(matches!(err, GridxError::TransitionConflict { .. }));

        let read = service.get(&contract.contract_id).unwrap();
        assert_eq!(read.status, EscrowStatus::Funded);
        assert_eq!(read.funded_at, Some(1_700_000_010));
        // Exactly one funding transaction exists.
        let fundings = service
            .transactions(&contract.contract_id)
            .unwrap()
            .into_iter()
            .filter(|t| t.kind == TransactionKind::Funding)
            .count();
        assert_eq!(fundings, 1);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn create_validations() {
        let (service, dir) = temp_service("create_validate");
        let err = service
            .create(EscrowType::ServicePayment, "b1", "s1", flop("0"), None, "", "", 0)
            .unwrap_err();
        assert!(matches!(err, GridxError::ZeroAmount));

        let err = service
            .create(EscrowType::ServicePayment, "", "s1", flop("1"), None, "", "", 0)
            .unwrap_err();
        assert!(matches!(err, GridxError::EmptyNodeId));

        // Currency outside the configured adapter set.
        let narrow_dir = std::env::temp_dir().join(format!("gridx_escrow_narrow_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&narrow_dir);
        let narrow = EscrowService::new(
            Arc::new(Store::open(&narrow_dir).unwrap()),
            EscrowSection::default(),
            vec![Currency::Flop],
        );
        let err = narrow
            .create(
                EscrowType::ServicePayment,
                "b1",
                "s1",
                Amount::parse("1", Currency::Btc).unwrap(),
                None,
                "",
                "",
                0,
            )
            .unwrap_err();
        assert!(matches!(err, GridxError::UnsupportedCurrency(_)));
        let _ = std::fs::remove_dir_all(&narrow_dir);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn dispute_then_refund_returns_full_amount() {
        let (service, dir) = temp_service("dispute");
        let contract = create_simple(&service, "10.00");
        service.fund(&contract.contract_id, "TXF", 10).unwrap();
        service.start(&contract.contract_id, 20).unwrap();

        let disputed = service
            .dispute(&contract.contract_id, "b1", "service not delivered", Some("logs".into()), 30)
            .unwrap();
        assert_eq!(disputed.status, EscrowStatus::Disputed);
        assert_eq!(disputed.dispute_reason.as_deref(), Some("service not delivered"));
        let disputes = service.disputes(&contract.contract_id).unwrap();
        assert_eq!(disputes.len(), 1);
        assert_eq!(disputes[0].initiator_id, "b1");

        let refunded = service.refund(&contract.contract_id, "TXR", 40).unwrap();
        assert_eq!(refunded.status, EscrowStatus::Refunded);
        let refunds: Vec<_> = service
            .transactions(&contract.contract_id)
            .unwrap()
            .into_iter()
            .filter(|t| t.kind == TransactionKind::Refund)
            .collect();
        assert_eq!(refunds.len(), 1);
        assert_eq!(refunds[0].amount.units(), contract.amount.units());
        assert_eq!(refunds[0].to_address, "buyer_b1");

        // Terminal: no further transitions.
        assert!(service.dispute(&contract.contract_id, "s1", "late", None, 50).is_err());
        assert!(service.refund(&contract.contract_id, "TXR2", 50).is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn complete_and_dispute_serialize_one_winner() {
        let (service, dir) = temp_service("race");
        let contract = create_simple(&service, "10.00");
        service.fund(&contract.contract_id, "TXF", 10).unwrap();
        service.start(&contract.contract_id, 20).unwrap();

        service.complete(&contract.contract_id, "TXC", 30).unwrap();
        // The losing dispute observes the committed terminal state.
        let err = service
            .dispute(&contract.contract_id, "b1", "too late", None, 31)
            .unwrap_err();
        assert!(matches!(err, GridxError::InvalidTransition { .. }));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn cancel_only_from_pending() {
        let (service, dir) = temp_service("cancel");
        let contract = create_simple(&service, "10.00");
        let cancelled = service.cancel(&contract.contract_id, 10).unwrap();
        assert_eq!(cancelled.status, EscrowStatus::Cancelled);

        let other = create_simple(&service, "5.00");
        service.fund(&other.contract_id, "TXF", 10).unwrap();
        let err = service.cancel(&other.contract_id, 20).unwrap_err();
        assert!(matches!(err, GridxError::TransitionConflict { .. }));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn smallest_amount_split_boundary() {
        let (service, dir) = temp_service("boundary");
        let contract = create_simple(&service, "0.01");
        service.fund(&contract.contract_id, "TXF", 10).unwrap();
        service.start(&contract.contract_id, 20).unwrap();
        service.complete(&contract.contract_id, "TXC", 30).unwrap();

        let txs = service.transactions(&contract.contract_id).unwrap();
        let community = txs.iter().find(|t| t.kind == TransactionKind::CommunityFund).unwrap();
        let seller = txs.iter().find(|t| t.kind == TransactionKind::SellerPayment).unwrap();
        assert_eq!(community.amount.to_decimal_string(), "0.00050000");
        assert_eq!(seller.amount.to_decimal_string(), "0.00950000");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn list_by_user_and_statistics() {
        let (service, dir) = temp_service("stats");
        let c1 = create_simple(&service, "10.00");
        service.fund(&c1.contract_id, "TXF", 10).unwrap();
        service.start(&c1.contract_id, 20).unwrap();
        service.complete(&c1.contract_id, "TXC", 30).unwrap();

        let _c2 = create_simple(&service, "4.00");
        let c3 = service
            .create(EscrowType::ApiUsage, "b2", "s1", flop("2.00"), None, "", "", 1_700_000_100)
            .unwrap();

        let for_b1 = service.list_by_user("b1", None).unwrap();
        assert_eq!(for_b1.len(), 2);
        let for_s1 = service.list_by_user("s1", None).unwrap();
        assert_eq!(for_s1.len(), 3);
        // Newest first.
        assert_eq!(for_s1[0].contract_id, c3.contract_id);
        let completed_only = service.list_by_user("s1", Some(EscrowStatus::Completed)).unwrap();
        assert_eq!(completed_only.len(), 1);

        let stats = service.statistics().unwrap();
        assert_eq!(stats.total_contracts, 3);
        assert_eq!(stats.status_counts["completed"], 1);
        assert_eq!(stats.status_counts["pending"], 2);
        assert_eq!(stats.completed_volume["FLOP"], "10.00000000");
        assert_eq!(stats.community_fund["FLOP"], "0.50000000");
        assert!((stats.success_rate - 100.0 / 3.0).abs() < 1e-9);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
