//! End-to-end tests for the custody vault facade.
//!
//! Each test builds its own vault over in-memory collaborators and drives
//! it only through the public async API: deposits, withdrawals, unit
//! transfers, auto-conversion, locks, rewards and recovery. After every
//! failed operation the pool state and token balances must be exactly what
//! they were before.

mod common;

use std::sync::Arc;

use chrono::Duration;

use custody_protocol::exchange::ConversionBounds;
use custody_protocol::lock::LockStatus;
use custody_protocol::{AccountId, Clock, DepositRequest, TokenHost, TokenId, VaultError};

use common::*;

fn request(account: &AccountId, token: &TokenId, amount: u64) -> DepositRequest {
    DepositRequest {
        account: account.clone(),
        token: token.clone(),
        amount,
        conversion: None,
    }
}

// ---------------------------------------------------------------------------
// Share accounting
// ---------------------------------------------------------------------------

#[tokio::test]
async fn first_deposit_mints_offset_to_sink() {
    init_tracing();
    let h = harness();

    let units = h.fund_and_deposit(&alice(), &usdc(), 10_000).await;
    assert_eq!(units, 9_000);

    let snapshot = h.vault.snapshot().await;
    assert_eq!(snapshot.total_units, 10_000);
    assert_eq!(
        snapshot.holdings.get(&h.vault.config().custody_account),
        Some(&1_000)
    );
    assert_eq!(h.vault.pool_value().await.unwrap().total_value, 10_000);
}

#[tokio::test]
async fn first_deposit_at_offset_rejected_and_refunded() {
    let h = harness();
    h.host.mint(&usdc(), &alice(), 1_000);

    let err = h.vault.deposit(request(&alice(), &usdc(), 1_000)).await.unwrap_err();
    assert!(matches!(err, VaultError::DepositTooSmall { .. }));
    assert_eq!(h.host.balance_of(&usdc(), &alice()), 1_000);
    assert_eq!(h.vault.snapshot().await.total_units, 0);
}

#[tokio::test]
async fn later_deposits_and_full_exit_are_proportional() {
    let h = harness();
    let alice_units = h.fund_and_deposit(&alice(), &usdc(), USDC).await;
    let bob_units = h.fund_and_deposit(&bob(), &usdc(), USDC / 2).await;
    assert_eq!(alice_units, 999_000);
    assert_eq!(bob_units, 500_000);

    let receipt = h.vault.withdraw(&alice(), alice_units, &usdc()).await.unwrap();
    assert_eq!(receipt.amount_out, 999_000);
    assert_eq!(h.host.balance_of(&usdc(), &alice()), 999_000);

    let receipt = h.vault.withdraw(&bob(), bob_units, &usdc()).await.unwrap();
    assert_eq!(receipt.amount_out, 500_000);

    // Only the sink's offset is left behind.
    let valuation = h.vault.pool_value().await.unwrap();
    assert_eq!(valuation.total_units, 1_000);
    assert_eq!(valuation.total_value, 1_000);
    h.vault.audit().await.unwrap();
}

#[tokio::test]
async fn multi_asset_pool_values_at_fresh_prices() {
    let h = harness();
    let alice_units = h.fund_and_deposit(&alice(), &weth(), WETH).await;
    assert_eq!(alice_units, 1_999_999_000);
    let bob_units = h.fund_and_deposit(&bob(), &usdc(), 2_000 * USDC).await;
    assert_eq!(bob_units, 2_000_000_000);
    assert_eq!(h.vault.pool_value().await.unwrap().total_value, 4_000 * USDC as u128);

    h.set_weth_price(3_000);
    assert_eq!(h.vault.pool_value().await.unwrap().total_value, 5_000 * USDC as u128);

    // Bob's half is now worth 2500 USDC, more than the pool holds in USDC.
    let before = h.vault.state().await;
    let err = h.vault.withdraw(&bob(), bob_units, &usdc()).await.unwrap_err();
    assert!(matches!(
        err,
        VaultError::InsufficientBalance {
            available: 2_000_000_000,
            requested: 2_500_000_000,
            ..
        }
    ));
    assert_eq!(h.vault.state().await, before);

    let receipt = h.vault.withdraw(&bob(), bob_units, &weth()).await.unwrap();
    assert_eq!(receipt.amount_out, 833_333_333_333_333_333);
    assert_eq!(h.host.balance_of(&weth(), &bob()), 833_333_333_333_333_333);

    // Value per unit is unchanged by the exit: 2.5e9 value over 2e9 units.
    let valuation = h.vault.pool_value().await.unwrap();
    assert_eq!(valuation.total_units, 2_000_000_000);
    assert_eq!(valuation.total_value, 2_500_000_000);
    h.vault.audit().await.unwrap();
}

#[tokio::test]
async fn stale_price_blocks_valuation_without_side_effects() {
    let h = harness();
    h.fund_and_deposit(&alice(), &weth(), WETH).await;
    h.clock.advance(301);

    h.host.mint(&usdc(), &bob(), USDC);
    let err = h.vault.deposit(request(&bob(), &usdc(), USDC)).await.unwrap_err();
    assert!(matches!(err, VaultError::StalePrice { .. }));
    assert!(err.is_price_related());
    assert_eq!(h.host.balance_of(&usdc(), &bob()), USDC);

    h.set_weth_price(2_000);
    h.vault.deposit(request(&bob(), &usdc(), USDC)).await.unwrap();
}

#[tokio::test]
async fn withdraw_beyond_holdings_never_underflows() {
    let h = harness();
    let units = h.fund_and_deposit(&alice(), &usdc(), 50_000).await;
    let before = h.vault.state().await;

    let err = h.vault.withdraw(&alice(), units + 1, &usdc()).await.unwrap_err();
    assert_eq!(err, VaultError::insufficient_units(units, units + 1));
    assert_eq!(h.vault.state().await, before);
    assert_eq!(h.host.balance_of(&usdc(), &alice()), 0);
}

#[tokio::test]
async fn fee_on_transfer_credits_measured_amount() {
    let h = harness();
    h.host.set_transfer_fee_bps(&usdc(), 100);

    let units = h.fund_and_deposit(&alice(), &usdc(), 100_000).await;
    assert_eq!(units, 98_000);

    let state = h.vault.state().await;
    assert_eq!(state.ledger.balance(&usdc()), 99_000);
    assert_eq!(state.ledger.flows_of(&alice(), &usdc()).deposited, 99_000);
    h.vault.audit().await.unwrap();
}

#[tokio::test]
async fn failed_payout_rolls_back_burn() {
    let h = harness();
    h.fund_and_deposit(&alice(), &usdc(), 10_000).await;
    let units = h.fund_and_deposit(&bob(), &weth(), WETH / 1_000).await;
    let before = h.vault.state().await;

    h.host.set_failing(&weth(), true);
    let err = h.vault.withdraw(&bob(), units, &weth()).await.unwrap_err();
    assert!(matches!(err, VaultError::TransferFailed { .. }));
    assert_eq!(h.vault.state().await, before);

    h.host.set_failing(&weth(), false);
    h.vault.withdraw(&bob(), units, &weth()).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_deposits_are_serialized() {
    let h = Arc::new(harness());
    let mut tasks = Vec::new();
    for i in 0..20 {
        let h = Arc::clone(&h);
        tasks.push(tokio::spawn(async move {
            let who = AccountId::new(format!("depositor-{i}"));
            h.fund_and_deposit(&who, &usdc(), USDC).await
        }));
    }
    let minted: u128 = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.expect("task"))
        .sum();

    // Exactly one of them paid the first-deposit offset.
    assert_eq!(minted, 20 * USDC as u128 - 1_000);
    let report = h.vault.audit().await.unwrap();
    assert_eq!(report.total_units, 20 * USDC as u128);
    assert_eq!(report.total_value, 20 * USDC as u128);
}

#[tokio::test]
async fn unit_transfers_move_ownership() {
    let h = harness();
    let units = h.fund_and_deposit(&alice(), &usdc(), 10_000).await;
    h.vault.transfer_units(&alice(), &bob(), 4_000).await.unwrap();

    let receipt = h.vault.withdraw(&bob(), 4_000, &usdc()).await.unwrap();
    assert_eq!(receipt.amount_out, 4_000);
    assert_eq!(
        h.vault.account_view(&alice()).await.unwrap().units,
        units - 4_000
    );

    let custody = h.vault.config().custody_account.clone();
    assert!(matches!(
        h.vault.transfer_units(&alice(), &custody, 1).await,
        Err(VaultError::ReservedAccount(_))
    ));
}

/// Deterministic generator for operation sequences.
struct Lcg(u64);

impl Lcg {
    fn below(&mut self, bound: u64) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        (self.0 >> 33) % bound
    }
}

#[tokio::test]
async fn pool_value_matches_balances_across_mixed_sequences() {
    init_tracing();
    let h = harness();
    let custody = h.vault.config().custody_account.clone();
    h.fund_and_deposit(&alice(), &usdc(), 1_000 * USDC).await;

    for seed in [7_u64, 42, 1_337] {
        let mut rng = Lcg(seed);
        for step in 0..40 {
            let who = if rng.below(2) == 0 { alice() } else { bob() };
            let token = if rng.below(2) == 0 { usdc() } else { weth() };

            if rng.below(3) < 2 {
                let amount = if token == usdc() {
                    (1 + rng.below(5_000)) * USDC
                } else {
                    (1 + rng.below(20)) * (WETH / 100)
                };
                h.fund_and_deposit(&who, &token, amount).await;
            } else {
                let held = h.vault.account_view(&who).await.unwrap().units;
                let divisor = 1 + rng.below(3) as u128;
                if held / divisor > 0 {
                    // May fail when the chosen token is short; a failure
                    // must leave the books as they were.
                    let _ = h.vault.withdraw(&who, held / divisor, &token).await;
                }
            }

            let snapshot = h.vault.snapshot().await;
            let usdc_held = snapshot.balances.get(&usdc()).copied().unwrap_or(0) as u128;
            let weth_held = snapshot.balances.get(&weth()).copied().unwrap_or(0) as u128;
            // WETH at $2000: 1e18 wei is worth 2000e6 USDC units.
            let expected = usdc_held + weth_held * 2_000 / 1_000_000_000_000;

            let valuation = h.vault.pool_value().await.unwrap();
            assert_eq!(valuation.total_value, expected, "seed {seed} step {step}");
            let report = h.vault.audit().await.unwrap();
            assert_eq!(report.total_value, expected, "seed {seed} step {step}");
            assert!(h.host.balance_of(&usdc(), &custody) as u128 >= usdc_held);
            assert!(h.host.balance_of(&weth(), &custody) as u128 >= weth_held);
        }
    }
}

// ---------------------------------------------------------------------------
// Auto-conversion
// ---------------------------------------------------------------------------

fn bounds(h: &Harness, slippage_bps: u32, secs: i64) -> Option<ConversionBounds> {
    Some(ConversionBounds {
        max_slippage_bps: slippage_bps,
        deadline: h.clock.now() + Duration::seconds(secs),
    })
}

#[tokio::test]
async fn auto_convert_swaps_to_underlying() {
    let h = harness();
    h.venue.set_rate(&weth(), 2_000 * USDC, WETH);
    assert!(h.vault.enable_auto_convert(&alice()).await.unwrap());
    assert!(!h.vault.enable_auto_convert(&alice()).await.unwrap());

    h.host.mint(&weth(), &alice(), WETH);
    let mut req = request(&alice(), &weth(), WETH);
    req.conversion = bounds(&h, 50, 60);
    let receipt = h.vault.deposit(req).await.unwrap();

    assert_eq!(receipt.converted, Some(2_000 * USDC));
    assert_eq!(receipt.mint.token, usdc());
    assert_eq!(receipt.mint.units_minted, 2_000 * USDC as u128 - 1_000);

    let state = h.vault.state().await;
    assert_eq!(state.ledger.balance(&usdc()), 2_000 * USDC);
    assert_eq!(state.ledger.balance(&weth()), 0);
    assert_eq!(h.host.balance_of(&weth(), &dex()), WETH);
    assert!(h.vault.account_view(&alice()).await.unwrap().auto_convert);
}

#[tokio::test]
async fn auto_convert_slippage_aborts_whole_deposit() {
    let h = harness();
    h.venue.set_rate(&weth(), 1_900 * USDC, WETH);
    h.vault.enable_auto_convert(&alice()).await.unwrap();
    h.host.mint(&weth(), &alice(), WETH);
    let before = h.vault.state().await;

    let mut req = request(&alice(), &weth(), WETH);
    req.conversion = bounds(&h, 50, 60);
    let err = h.vault.deposit(req).await.unwrap_err();

    assert_eq!(
        err,
        VaultError::SlippageExceeded {
            received: 1_900 * USDC,
            minimum: 1_990 * USDC
        }
    );
    assert_eq!(h.vault.state().await, before);
    assert_eq!(h.host.balance_of(&weth(), &alice()), WETH);
    assert_eq!(h.host.balance_of(&weth(), &dex()), 0);
}

#[tokio::test]
async fn auto_convert_deadline_aborts_whole_deposit() {
    let h = harness();
    h.venue.set_rate(&weth(), 2_000 * USDC, WETH);
    h.venue.set_latency_secs(120);
    h.vault.enable_auto_convert(&alice()).await.unwrap();
    h.host.mint(&weth(), &alice(), WETH);
    let before = h.vault.state().await;

    let mut req = request(&alice(), &weth(), WETH);
    req.conversion = bounds(&h, 50, 60);
    let err = h.vault.deposit(req).await.unwrap_err();

    assert!(matches!(err, VaultError::DeadlineExpired { .. }));
    assert_eq!(h.vault.state().await, before);
    assert_eq!(h.host.balance_of(&weth(), &alice()), WETH);
}

#[tokio::test]
async fn auto_convert_requires_caller_bounds() {
    let h = harness();
    h.vault.enable_auto_convert(&alice()).await.unwrap();
    h.host.mint(&weth(), &alice(), WETH);

    let err = h.vault.deposit(request(&alice(), &weth(), WETH)).await.unwrap_err();
    assert!(matches!(err, VaultError::InvalidParameter(_)));

    // Underlying deposits never convert and need no bounds.
    h.fund_and_deposit(&alice(), &usdc(), 10_000).await;
}

// ---------------------------------------------------------------------------
// Locks & rewards
// ---------------------------------------------------------------------------

async fn fund_budget(h: &Harness, amount: u64) {
    let sponsor = AccountId::new("sponsor");
    h.host.mint(&usdc(), &sponsor, amount);
    h.vault.fund_rewards(&sponsor, amount).await.unwrap();
}

#[tokio::test]
async fn rewards_scale_with_stake() {
    let h = harness();
    fund_budget(&h, 10_000).await;
    h.fund_and_deposit(&alice(), &usdc(), 10_000).await;
    h.fund_and_deposit(&bob(), &usdc(), 10_000).await;

    h.vault.lock(&alice(), 1, 1_000).await.unwrap();
    let receipt = h.vault.lock(&bob(), 1_000, 1_000).await.unwrap();
    assert_eq!(receipt.promised_reward, 1_000);

    h.clock.advance(1_000);
    let small = h.vault.unlock(&alice()).await.unwrap().reward_paid;
    let large = h.vault.unlock(&bob()).await.unwrap().reward_paid;
    assert_eq!(small, 1);
    assert_eq!(large, 1_000);
    assert_eq!(h.host.balance_of(&usdc(), &bob()), 1_000);
    h.vault.audit().await.unwrap();
}

#[tokio::test]
async fn equal_locks_earn_equal_rewards() {
    let h = harness();
    fund_budget(&h, 10_000).await;
    h.fund_and_deposit(&alice(), &usdc(), 10_000).await;
    h.fund_and_deposit(&bob(), &usdc(), 10_000).await;

    let a = h.vault.lock(&alice(), 2_000, 1_000).await.unwrap();
    let b = h.vault.lock(&bob(), 2_000, 1_000).await.unwrap();
    assert_eq!(a.promised_reward, b.promised_reward);

    h.clock.advance(400);
    assert_eq!(
        h.vault.calculate_reward(&alice()).await.unwrap(),
        h.vault.calculate_reward(&bob()).await.unwrap()
    );

    h.clock.advance(600);
    let alice_paid = h.vault.unlock(&alice()).await.unwrap().reward_paid;
    let bob_paid = h.vault.unlock(&bob()).await.unwrap().reward_paid;
    assert_eq!(alice_paid, 2_000);
    assert_eq!(alice_paid, bob_paid);
    h.vault.audit().await.unwrap();
}

#[tokio::test]
async fn rewards_scale_with_time_and_pay_once() {
    let h = harness();
    fund_budget(&h, 10_000).await;
    h.fund_and_deposit(&bob(), &usdc(), 10_000).await;
    h.vault.lock(&bob(), 1_000, 1_000).await.unwrap();

    h.clock.advance(500);
    assert_eq!(h.vault.calculate_reward(&bob()).await.unwrap(), 500);
    assert_eq!(h.vault.claim_rewards(&bob()).await.unwrap(), 500);
    assert_eq!(h.vault.claim_rewards(&bob()).await.unwrap(), 0);
    assert_eq!(h.vault.account_view(&bob()).await.unwrap().reward_debt, 500);

    h.clock.advance(5_000);
    assert_eq!(h.vault.unlock(&bob()).await.unwrap().reward_paid, 500);
    assert!(matches!(
        h.vault.claim_rewards(&bob()).await,
        Err(VaultError::NotLocked(_))
    ));
    assert_eq!(h.host.balance_of(&usdc(), &bob()), 1_000);
}

#[tokio::test]
async fn lock_released_exactly_once_at_expiry() {
    let h = harness();
    fund_budget(&h, 100_000).await;
    let units = h.fund_and_deposit(&alice(), &usdc(), 10_000).await;
    let receipt = h.vault.lock(&alice(), units, 3_600).await.unwrap();
    assert_eq!(receipt.promised_reward, 32_400);
    let expiry = receipt.record.expiry;

    assert!(matches!(
        h.vault.transfer_units(&alice(), &bob(), 1).await,
        Err(VaultError::InsufficientBalance { .. })
    ));
    assert!(matches!(
        h.vault.withdraw(&alice(), 1, &usdc()).await,
        Err(VaultError::InsufficientBalance { .. })
    ));

    h.clock.advance(3_599);
    assert_eq!(
        h.vault.unlock(&alice()).await.unwrap_err(),
        VaultError::StillLocked { expiry }
    );
    assert_eq!(
        h.vault.account_view(&alice()).await.unwrap().lock,
        LockStatus::Locked { expiry }
    );

    h.clock.advance(1);
    assert_eq!(h.vault.unlock(&alice()).await.unwrap().units_released, units);
    assert!(matches!(
        h.vault.unlock(&alice()).await,
        Err(VaultError::NotLocked(_))
    ));
    h.vault.withdraw(&alice(), units, &usdc()).await.unwrap();
}

#[tokio::test]
async fn lock_refused_when_budget_cannot_cover_promise() {
    let h = harness();
    fund_budget(&h, 999).await;
    h.fund_and_deposit(&alice(), &usdc(), 10_000).await;

    let err = h.vault.lock(&alice(), 1_000, 1_000).await.unwrap_err();
    assert_eq!(
        err,
        VaultError::InsufficientRewardBalance {
            required: 1_000,
            available: 999
        }
    );
    assert_eq!(
        h.vault.account_view(&alice()).await.unwrap().lock,
        LockStatus::Unlocked
    );
}

#[tokio::test]
async fn lock_duration_bounds_enforced() {
    let h = harness();
    h.fund_and_deposit(&alice(), &usdc(), 10_000).await;
    let max = h.vault.config().lock.max_duration_secs;

    assert!(matches!(
        h.vault.lock(&alice(), 1, max + 1).await,
        Err(VaultError::DurationOutOfRange { .. })
    ));
    assert!(matches!(
        h.vault.lock(&alice(), 1, u64::MAX).await,
        Err(VaultError::DurationOutOfRange { .. })
    ));
}

// ---------------------------------------------------------------------------
// Recovery & reserved accounts
// ---------------------------------------------------------------------------

#[tokio::test]
async fn recovery_rejects_pooled_and_equivalent_tokens() {
    let h = harness();
    let custody = h.vault.config().custody_account.clone();
    let ops = AccountId::new("ops");

    for symbol in ["USDC", "WETH", "USDC.e"] {
        let token = TokenId::new(symbol);
        h.host.mint(&token, &custody, 500);
        assert!(
            matches!(
                h.vault.recover_stray(&token, &ops).await,
                Err(VaultError::RecoveryRejected { .. })
            ),
            "{symbol} must not be recoverable"
        );
    }

    let junk = TokenId::new("JUNK");
    h.host.mint(&junk, &custody, 500);
    assert_eq!(h.vault.recover_stray(&junk, &ops).await.unwrap(), 500);
    assert_eq!(h.host.balance_of(&junk, &ops), 500);
}

#[tokio::test]
async fn reserved_accounts_cannot_deposit() {
    let h = harness();
    let rewards = h.vault.config().reward_account.clone();
    h.host.mint(&usdc(), &rewards, 10_000);
    assert!(matches!(
        h.vault.deposit(request(&rewards, &usdc(), 10_000)).await,
        Err(VaultError::ReservedAccount(_))
    ));
}
