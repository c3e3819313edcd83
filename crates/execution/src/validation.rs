//! Pre-trade rule checks and risk preview.
//!
//! Everything here is synchronous and side-effect-free: callers fetch the
//! broker state first, then hand it in.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tradedesk_core::{
    Account, AccountId, AccountInfo, OrderRequest, PriceRelation, Side, SymbolInfo,
    ValidationError,
};

/// Broker state an order is checked against.
#[derive(Debug, Clone, Copy)]
pub struct OrderContext<'a> {
    pub account_id: AccountId,
    pub account: Option<&'a Account>,
    pub symbol: Option<&'a SymbolInfo>,
    pub account_info: &'a AccountInfo,
    pub open_positions: usize,
}

/// Inputs for a risk preview. `entry_price` overrides the side's quote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewRequest {
    pub symbol: String,
    pub side: Side,
    pub volume: Decimal,
    #[serde(default)]
    pub entry_price: Option<Decimal>,
    #[serde(default)]
    pub stop_loss: Option<Decimal>,
    #[serde(default)]
    pub take_profit: Option<Decimal>,
}

/// Risk/reward breakdown for a prospective position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionPreview {
    pub symbol: String,
    pub side: Side,
    pub volume: Decimal,
    pub entry_price: Decimal,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub pip_size: Decimal,
    pub risk_pips: Option<Decimal>,
    pub reward_pips: Option<Decimal>,
    pub risk_amount: Option<Decimal>,
    pub potential_profit: Option<Decimal>,
    pub risk_reward_ratio: Option<Decimal>,
    pub margin_required: Decimal,
    pub free_margin: Decimal,
    pub margin_sufficient: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct OrderValidationEngine {
    max_open_positions: usize,
}

impl OrderValidationEngine {
    #[must_use]
    pub const fn new(max_open_positions: usize) -> Self {
        Self { max_open_positions }
    }

    #[must_use]
    pub const fn max_open_positions(&self) -> usize {
        self.max_open_positions
    }

    /// Checks an order against account, symbol, volume, stop, and margin rules,
    /// stopping at the first violation.
    ///
    /// # Errors
    /// Returns the first [`ValidationError`] encountered.
    pub fn validate_order(
        &self,
        order: &OrderRequest,
        ctx: &OrderContext<'_>,
    ) -> Result<(), ValidationError> {
        let account = ctx
            .account
            .ok_or(ValidationError::AccountNotFound(ctx.account_id))?;
        if !account.is_active {
            return Err(ValidationError::AccountInactive(ctx.account_id));
        }

        let symbol = ctx
            .symbol
            .ok_or_else(|| ValidationError::SymbolNotFound(order.symbol.clone()))?;
        if !symbol.tradable {
            return Err(ValidationError::SymbolNotTradable(symbol.name.clone()));
        }
        if !symbol.trade_allowed || !ctx.account_info.trade_allowed {
            return Err(ValidationError::TradingNotAllowed(symbol.name.clone()));
        }

        check_volume(symbol, order.volume)?;

        check_levels(symbol, order.side, order.stop_loss, order.take_profit)?;

        if ctx.account_info.free_margin <= Decimal::ZERO {
            return Err(ValidationError::NoFreeMargin(ctx.account_info.free_margin));
        }
        if ctx.open_positions >= self.max_open_positions {
            return Err(ValidationError::PositionLimitReached {
                open: ctx.open_positions,
                max: self.max_open_positions,
            });
        }

        Ok(())
    }

    /// Checks new stop levels for an open position on `side`.
    ///
    /// # Errors
    /// [`ValidationError::NothingToModify`] when neither level is given,
    /// otherwise the stop/take-profit rule that was violated.
    pub fn validate_modification(
        &self,
        symbol: &SymbolInfo,
        side: Side,
        stop_loss: Option<Decimal>,
        take_profit: Option<Decimal>,
    ) -> Result<(), ValidationError> {
        if stop_loss.is_none() && take_profit.is_none() {
            return Err(ValidationError::NothingToModify);
        }
        check_levels(symbol, side, stop_loss, take_profit)
    }

    /// Computes the risk breakdown without touching the broker.
    ///
    /// # Errors
    /// Volume outside the symbol's bounds, or amounts too large to represent.
    pub fn preview(
        &self,
        symbol: &SymbolInfo,
        account_info: &AccountInfo,
        request: &PreviewRequest,
    ) -> Result<PositionPreview, ValidationError> {
        check_volume(symbol, request.volume)?;

        let entry = request
            .entry_price
            .unwrap_or_else(|| symbol.entry_price(request.side));
        let overflow = || ValidationError::PreviewOverflow {
            volume: request.volume,
            price: entry,
        };
        let pip_size = symbol.pip_size();
        let notional = request
            .volume
            .checked_mul(symbol.contract_size)
            .ok_or_else(overflow)?;
        let pip_value = notional.checked_mul(pip_size).ok_or_else(overflow)?;

        let to_pips = |from: Decimal, to: Decimal| -> Result<Decimal, ValidationError> {
            let distance = to.checked_sub(from).ok_or_else(overflow)?.abs();
            if pip_size.is_zero() {
                return Ok(Decimal::ZERO);
            }
            Ok(distance.checked_div(pip_size).ok_or_else(overflow)?.round_dp(2))
        };
        let money = |pips: Decimal| -> Result<Decimal, ValidationError> {
            Ok(pips.checked_mul(pip_value).ok_or_else(overflow)?.round_dp(2))
        };

        let risk_pips = request.stop_loss.map(|sl| to_pips(sl, entry)).transpose()?;
        let reward_pips = request.take_profit.map(|tp| to_pips(entry, tp)).transpose()?;

        let risk_reward_ratio = match (risk_pips, reward_pips) {
            (Some(risk), Some(reward)) if !risk.is_zero() => {
                Some(reward.checked_div(risk).ok_or_else(overflow)?.round_dp(2))
            }
            _ => None,
        };

        let leverage = Decimal::from(account_info.leverage.max(1));
        let margin_required = notional
            .checked_mul(entry)
            .and_then(|m| m.checked_div(leverage))
            .ok_or_else(overflow)?
            .round_dp(2);

        Ok(PositionPreview {
            symbol: symbol.name.clone(),
            side: request.side,
            volume: request.volume,
            entry_price: entry,
            stop_loss: request.stop_loss,
            take_profit: request.take_profit,
            pip_size,
            risk_pips,
            reward_pips,
            risk_amount: risk_pips.map(money).transpose()?,
            potential_profit: reward_pips.map(money).transpose()?,
            risk_reward_ratio,
            margin_required,
            free_margin: account_info.free_margin,
            margin_sufficient: margin_required <= account_info.free_margin,
        })
    }
}

fn check_volume(symbol: &SymbolInfo, volume: Decimal) -> Result<(), ValidationError> {
    if volume <= Decimal::ZERO || volume < symbol.volume_min || volume > symbol.volume_max {
        return Err(ValidationError::VolumeOutOfRange {
            volume,
            min: symbol.volume_min,
            max: symbol.volume_max,
        });
    }
    Ok(())
}

impl Default for OrderValidationEngine {
    fn default() -> Self {
        Self::new(20)
    }
}

/// BUY: SL strictly below ask, TP strictly above ask. SELL mirrors against bid.
fn check_levels(
    symbol: &SymbolInfo,
    side: Side,
    stop_loss: Option<Decimal>,
    take_profit: Option<Decimal>,
) -> Result<(), ValidationError> {
    let reference = symbol.entry_price(side);
    let (sl_relation, tp_relation) = match side {
        Side::Buy => (PriceRelation::Below, PriceRelation::Above),
        Side::Sell => (PriceRelation::Above, PriceRelation::Below),
    };

    if let Some(sl) = stop_loss {
        if !strictly(sl, sl_relation, reference) {
            return Err(ValidationError::InvalidStopLoss {
                side,
                stop_loss: sl,
                relation: sl_relation,
                reference,
            });
        }
    }
    if let Some(tp) = take_profit {
        if !strictly(tp, tp_relation, reference) {
            return Err(ValidationError::InvalidTakeProfit {
                side,
                take_profit: tp,
                relation: tp_relation,
                reference,
            });
        }
    }
    Ok(())
}

fn strictly(level: Decimal, relation: PriceRelation, reference: Decimal) -> bool {
    match relation {
        PriceRelation::Below => level < reference,
        PriceRelation::Above => level > reference,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn eurusd() -> SymbolInfo {
        SymbolInfo {
            name: "EURUSD".to_string(),
            digits: 5,
            point: dec!(0.00001),
            bid: dec!(1.09990),
            ask: dec!(1.10000),
            volume_min: dec!(0.01),
            volume_max: dec!(50),
            volume_step: dec!(0.01),
            contract_size: dec!(100000),
            tradable: true,
            trade_allowed: true,
        }
    }

    fn info() -> AccountInfo {
        AccountInfo {
            login: "100001".to_string(),
            balance: dec!(10000),
            equity: dec!(10000),
            margin: dec!(0),
            free_margin: dec!(10000),
            leverage: 100,
            currency: "USD".to_string(),
            trade_allowed: true,
        }
    }

    fn check(
        order: &OrderRequest,
        symbol: &SymbolInfo,
        info: &AccountInfo,
        open: usize,
    ) -> Result<(), ValidationError> {
        let account = Account::demo(1, "100001", "paper");
        let ctx = OrderContext {
            account_id: 1,
            account: Some(&account),
            symbol: Some(symbol),
            account_info: info,
            open_positions: open,
        };
        OrderValidationEngine::new(20).validate_order(order, &ctx)
    }

    fn buy(volume: Decimal) -> OrderRequest {
        OrderRequest::market("EURUSD", Side::Buy, volume)
    }

    #[test]
    fn accepts_plain_market_order() {
        assert_eq!(check(&buy(dec!(0.1)), &eurusd(), &info(), 0), Ok(()));
    }

    #[test]
    fn missing_and_inactive_accounts_fail_first() {
        let symbol = eurusd();
        let info = info();
        let order = buy(dec!(0));
        let ctx = OrderContext {
            account_id: 5,
            account: None,
            symbol: Some(&symbol),
            account_info: &info,
            open_positions: 0,
        };
        let engine = OrderValidationEngine::default();
        assert_eq!(
            engine.validate_order(&order, &ctx),
            Err(ValidationError::AccountNotFound(5))
        );

        let inactive = Account::demo(5, "5", "paper").with_active(false);
        let ctx = OrderContext {
            account: Some(&inactive),
            ..ctx
        };
        assert_eq!(
            engine.validate_order(&order, &ctx),
            Err(ValidationError::AccountInactive(5))
        );
    }

    #[test]
    fn unknown_symbol_is_rejected() {
        let account = Account::demo(1, "1", "paper");
        let info = info();
        let ctx = OrderContext {
            account_id: 1,
            account: Some(&account),
            symbol: None,
            account_info: &info,
            open_positions: 0,
        };
        let err = OrderValidationEngine::default()
            .validate_order(&buy(dec!(0.1)), &ctx)
            .unwrap_err();
        assert_eq!(err, ValidationError::SymbolNotFound("EURUSD".to_string()));
    }

    #[test]
    fn closed_session_and_read_only_login_block_trading() {
        let mut symbol = eurusd();
        symbol.trade_allowed = false;
        assert!(matches!(
            check(&buy(dec!(0.1)), &symbol, &info(), 0),
            Err(ValidationError::TradingNotAllowed(_))
        ));

        let mut read_only = info();
        read_only.trade_allowed = false;
        assert!(matches!(
            check(&buy(dec!(0.1)), &eurusd(), &read_only, 0),
            Err(ValidationError::TradingNotAllowed(_))
        ));

        let mut hidden = eurusd();
        hidden.tradable = false;
        assert!(matches!(
            check(&buy(dec!(0.1)), &hidden, &info(), 0),
            Err(ValidationError::SymbolNotTradable(_))
        ));
    }

    #[test]
    fn volume_bounds_are_inclusive() {
        let symbol = eurusd();
        assert!(check(&buy(dec!(0.01)), &symbol, &info(), 0).is_ok());
        assert!(check(&buy(dec!(50)), &symbol, &info(), 0).is_ok());

        for volume in [dec!(0.009), dec!(50.01), dec!(0), dec!(-1)] {
            assert!(
                matches!(
                    check(&buy(volume), &symbol, &info(), 0),
                    Err(ValidationError::VolumeOutOfRange { .. })
                ),
                "volume {volume}"
            );
        }
    }

    #[test]
    fn buy_stop_loss_must_be_below_ask() {
        let symbol = eurusd();
        let at_ask = buy(dec!(0.1)).with_stops(Some(dec!(1.10000)), None);
        let err = check(&at_ask, &symbol, &info(), 0).unwrap_err();
        assert_eq!(
            err,
            ValidationError::InvalidStopLoss {
                side: Side::Buy,
                stop_loss: dec!(1.10000),
                relation: PriceRelation::Below,
                reference: dec!(1.10000),
            }
        );

        let below = buy(dec!(0.1)).with_stops(Some(dec!(1.09999)), None);
        assert!(check(&below, &symbol, &info(), 0).is_ok());
    }

    #[test]
    fn sell_stop_loss_must_be_above_bid() {
        let symbol = eurusd();
        let at_bid = OrderRequest::market("EURUSD", Side::Sell, dec!(0.1))
            .with_stops(Some(dec!(1.09990)), None);
        assert!(matches!(
            check(&at_bid, &symbol, &info(), 0),
            Err(ValidationError::InvalidStopLoss {
                relation: PriceRelation::Above,
                ..
            })
        ));

        let above = OrderRequest::market("EURUSD", Side::Sell, dec!(0.1))
            .with_stops(Some(dec!(1.09991)), Some(dec!(1.09000)));
        assert!(check(&above, &symbol, &info(), 0).is_ok());
    }

    #[test]
    fn take_profit_mirrors_stop_loss() {
        let symbol = eurusd();
        let buy_tp = buy(dec!(0.1)).with_stops(None, Some(dec!(1.09000)));
        assert!(matches!(
            check(&buy_tp, &symbol, &info(), 0),
            Err(ValidationError::InvalidTakeProfit {
                relation: PriceRelation::Above,
                ..
            })
        ));

        let sell_tp = OrderRequest::market("EURUSD", Side::Sell, dec!(0.1))
            .with_stops(None, Some(dec!(1.09990)));
        assert!(matches!(
            check(&sell_tp, &symbol, &info(), 0),
            Err(ValidationError::InvalidTakeProfit {
                relation: PriceRelation::Below,
                ..
            })
        ));
    }

    #[test]
    fn margin_and_position_cap() {
        let mut broke = info();
        broke.free_margin = dec!(0);
        assert_eq!(
            check(&buy(dec!(0.1)), &eurusd(), &broke, 0),
            Err(ValidationError::NoFreeMargin(dec!(0)))
        );

        assert!(check(&buy(dec!(0.1)), &eurusd(), &info(), 19).is_ok());
        assert_eq!(
            check(&buy(dec!(0.1)), &eurusd(), &info(), 20),
            Err(ValidationError::PositionLimitReached { open: 20, max: 20 })
        );
    }

    #[test]
    fn modification_requires_a_level() {
        let engine = OrderValidationEngine::default();
        assert_eq!(
            engine.validate_modification(&eurusd(), Side::Buy, None, None),
            Err(ValidationError::NothingToModify)
        );
        assert!(engine
            .validate_modification(&eurusd(), Side::Buy, Some(dec!(1.0950)), None)
            .is_ok());
        assert!(engine
            .validate_modification(&eurusd(), Side::Sell, None, Some(dec!(1.1005)))
            .is_err());
    }

    #[test]
    fn preview_buy_risk_reward() {
        let request = PreviewRequest {
            symbol: "EURUSD".to_string(),
            side: Side::Buy,
            volume: dec!(0.1),
            entry_price: Some(dec!(1.1000)),
            stop_loss: Some(dec!(1.0980)),
            take_profit: Some(dec!(1.1050)),
        };
        let preview = OrderValidationEngine::default().preview(&eurusd(), &info(), &request)
            .unwrap();

        assert_eq!(preview.pip_size, dec!(0.0001));
        assert_eq!(preview.risk_pips, Some(dec!(20.0)));
        assert_eq!(preview.reward_pips, Some(dec!(50.0)));
        assert_eq!(preview.risk_reward_ratio, Some(dec!(2.5)));
        assert_eq!(preview.risk_amount, Some(dec!(20)));
        assert_eq!(preview.potential_profit, Some(dec!(50)));
        // 0.1 lot × 100000 × 1.1 / 100
        assert_eq!(preview.margin_required, dec!(110));
        assert!(preview.margin_sufficient);
    }

    #[test]
    fn preview_defaults_entry_to_side_quote() {
        let request = PreviewRequest {
            symbol: "EURUSD".to_string(),
            side: Side::Sell,
            volume: dec!(1),
            entry_price: None,
            stop_loss: None,
            take_profit: Some(dec!(1.09490)),
        };
        let mut info = info();
        info.free_margin = dec!(500);
        let preview = OrderValidationEngine::default().preview(&eurusd(), &info, &request)
            .unwrap();

        assert_eq!(preview.entry_price, dec!(1.09990));
        assert_eq!(preview.risk_pips, None);
        assert_eq!(preview.reward_pips, Some(dec!(50)));
        assert_eq!(preview.risk_reward_ratio, None);
        assert!(!preview.margin_sufficient);
    }

    #[test]
    fn preview_ratio_absent_for_zero_risk() {
        let request = PreviewRequest {
            symbol: "EURUSD".to_string(),
            side: Side::Buy,
            volume: dec!(0.1),
            entry_price: Some(dec!(1.1000)),
            stop_loss: Some(dec!(1.1000)),
            take_profit: Some(dec!(1.1050)),
        };
        let preview = OrderValidationEngine::default().preview(&eurusd(), &info(), &request)
            .unwrap();
        assert_eq!(preview.risk_pips, Some(dec!(0)));
        assert_eq!(preview.risk_reward_ratio, None);
    }

    #[test]
    fn preview_rejects_volume_outside_symbol_bounds() {
        let request = PreviewRequest {
            symbol: "EURUSD".to_string(),
            side: Side::Buy,
            volume: dec!(1000000000000000000000000),
            entry_price: None,
            stop_loss: Some(dec!(1.0980)),
            take_profit: Some(dec!(1.1050)),
        };
        let err = OrderValidationEngine::default()
            .preview(&eurusd(), &info(), &request)
            .unwrap_err();
        assert!(matches!(err, ValidationError::VolumeOutOfRange { .. }), "{err}");
    }

    #[test]
    fn preview_reports_overflow_instead_of_panicking() {
        let mut symbol = eurusd();
        symbol.volume_max = Decimal::MAX;
        let request = PreviewRequest {
            symbol: "EURUSD".to_string(),
            side: Side::Buy,
            volume: dec!(1000000000000000000000000),
            entry_price: Some(dec!(1.1000)),
            stop_loss: Some(dec!(1.0980)),
            take_profit: None,
        };
        let err = OrderValidationEngine::default()
            .preview(&symbol, &info(), &request)
            .unwrap_err();
        assert!(matches!(err, ValidationError::PreviewOverflow { .. }), "{err}");
    }
}
