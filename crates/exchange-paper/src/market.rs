use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tradedesk_core::{
    AccountInfo, BrokerError, CloseReceipt, OrderReceipt, OrderRequest, PaperConfig, Position,
    SymbolInfo, Ticket,
};

/// Injected misbehaviour, used to exercise failure paths without a real terminal.
#[derive(Debug, Clone, Default)]
pub struct PaperFaults {
    /// Logins whose authentication is rejected
    pub rejected_logins: HashSet<String>,
    /// Every authentication fails as if the terminal were offline
    pub unreachable: bool,
    /// Tickets whose close request is rejected
    pub close_failures: HashSet<Ticket>,
    /// Next order submissions are rejected with this code and message
    pub reject_submits: Option<(i32, String)>,
    pub submit_latency: Duration,
    pub auth_latency: Duration,
}

#[derive(Debug, Default)]
struct PaperBook {
    balance: Decimal,
    positions: BTreeMap<Ticket, Position>,
}

/// Shared simulated market: quotes, per-login books, and fault knobs.
///
/// Positions survive connector teardown, like a real broker.
pub struct PaperMarket {
    symbols: RwLock<HashMap<String, SymbolInfo>>,
    books: Mutex<HashMap<String, PaperBook>>,
    faults: RwLock<PaperFaults>,
    starting_balance: Decimal,
    leverage: u32,
    next_ticket: AtomicU64,
    sessions_opened: AtomicUsize,
}

impl PaperMarket {
    #[must_use]
    pub fn new(starting_balance: Decimal, leverage: u32) -> Self {
        Self {
            symbols: RwLock::new(HashMap::new()),
            books: Mutex::new(HashMap::new()),
            faults: RwLock::new(PaperFaults::default()),
            starting_balance,
            leverage: leverage.max(1),
            next_ticket: AtomicU64::new(1_000),
            sessions_opened: AtomicUsize::new(0),
        }
    }

    /// Builds a market from configuration, quoting every configured symbol.
    #[must_use]
    pub fn from_config(config: &PaperConfig) -> Self {
        let mut market = Self::new(config.balance, config.leverage);
        let symbols = config
            .symbols
            .iter()
            .map(|s| {
                let point = Decimal::new(1, s.digits);
                let info = SymbolInfo {
                    name: s.name.clone(),
                    digits: s.digits,
                    point,
                    bid: s.bid,
                    ask: s.ask,
                    volume_min: s.volume_min,
                    volume_max: s.volume_max,
                    volume_step: s.volume_step,
                    contract_size: s.contract_size,
                    tradable: true,
                    trade_allowed: true,
                };
                (s.name.clone(), info)
            })
            .collect();
        market.symbols = RwLock::new(symbols);
        market.faults = RwLock::new(PaperFaults {
            submit_latency: Duration::from_millis(config.submit_latency_ms),
            ..PaperFaults::default()
        });
        market
    }

    pub async fn add_symbol(&self, info: SymbolInfo) {
        self.symbols.write().await.insert(info.name.clone(), info);
    }

    pub async fn set_quote(&self, symbol: &str, bid: Decimal, ask: Decimal) {
        if let Some(info) = self.symbols.write().await.get_mut(symbol) {
            info.bid = bid;
            info.ask = ask;
        }
    }

    pub async fn set_trade_allowed(&self, symbol: &str, allowed: bool) {
        if let Some(info) = self.symbols.write().await.get_mut(symbol) {
            info.trade_allowed = allowed;
        }
    }

    pub async fn update_faults(&self, update: impl FnOnce(&mut PaperFaults)) {
        update(&mut *self.faults.write().await);
    }

    pub(crate) async fn faults(&self) -> PaperFaults {
        self.faults.read().await.clone()
    }

    /// Number of successful authentications since the market was created.
    #[must_use]
    pub fn sessions_opened(&self) -> usize {
        self.sessions_opened.load(Ordering::SeqCst)
    }

    pub(crate) async fn open_session(&self, login: &str) -> AccountInfo {
        self.sessions_opened.fetch_add(1, Ordering::SeqCst);
        self.books
            .lock()
            .await
            .entry(login.to_string())
            .or_insert_with(|| PaperBook {
                balance: self.starting_balance,
                positions: BTreeMap::new(),
            });
        self.account_info(login).await
    }

    pub async fn symbol(&self, name: &str) -> Option<SymbolInfo> {
        self.symbols.read().await.get(name).cloned()
    }

    pub(crate) async fn account_info(&self, login: &str) -> AccountInfo {
        let positions = self.positions(login, None).await;
        let symbols = self.symbols.read().await;
        let books = self.books.lock().await;
        let balance = books.get(login).map_or(self.starting_balance, |b| b.balance);

        let floating: Decimal = positions.iter().map(|p| p.profit).sum();
        let leverage = Decimal::from(self.leverage);
        let margin: Decimal = positions
            .iter()
            .map(|p| {
                let contract = symbols.get(&p.symbol).map_or(Decimal::ONE, |s| s.contract_size);
                p.volume * contract * p.open_price / leverage
            })
            .sum();
        let equity = balance + floating;

        AccountInfo {
            login: login.to_string(),
            balance,
            equity,
            margin,
            free_margin: equity - margin,
            leverage: self.leverage,
            currency: "USD".to_string(),
            trade_allowed: true,
        }
    }

    /// Open positions for `login`, marked to the current quotes.
    pub async fn positions(&self, login: &str, symbol: Option<&str>) -> Vec<Position> {
        let symbols = self.symbols.read().await;
        let books = self.books.lock().await;
        let Some(book) = books.get(login) else {
            return Vec::new();
        };

        book.positions
            .values()
            .filter(|p| symbol.map_or(true, |s| p.symbol == s))
            .map(|p| {
                let mut marked = p.clone();
                if let Some(info) = symbols.get(&p.symbol) {
                    marked.current_price = info.exit_price(p.side);
                    marked.profit = Position::floating_profit(
                        p.side,
                        p.open_price,
                        marked.current_price,
                        p.volume,
                        info.contract_size,
                    );
                }
                marked
            })
            .collect()
    }

    pub(crate) async fn fill(
        &self,
        login: &str,
        order: &OrderRequest,
    ) -> Result<OrderReceipt, BrokerError> {
        let info = self.symbol(&order.symbol).await.ok_or_else(|| BrokerError::Rejected {
            code: 10013,
            message: format!("unknown symbol {}", order.symbol),
        })?;
        let price = info.entry_price(order.side);
        let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst);

        let position = Position {
            ticket,
            symbol: order.symbol.clone(),
            side: order.side,
            volume: order.volume,
            open_price: price,
            current_price: info.exit_price(order.side),
            stop_loss: order.stop_loss,
            take_profit: order.take_profit,
            profit: Decimal::ZERO,
            magic: order.magic,
            comment: order.comment.clone(),
            opened_at: Utc::now(),
        };

        let mut books = self.books.lock().await;
        let book = books.entry(login.to_string()).or_default();
        book.positions.insert(ticket, position);

        Ok(OrderReceipt {
            ticket,
            price,
            volume: order.volume,
        })
    }

    pub(crate) async fn close(
        &self,
        login: &str,
        ticket: Ticket,
    ) -> Result<CloseReceipt, BrokerError> {
        let marked = self
            .positions(login, None)
            .await
            .into_iter()
            .find(|p| p.ticket == ticket)
            .ok_or_else(|| position_not_found(ticket))?;

        let mut books = self.books.lock().await;
        let book = books.get_mut(login).ok_or_else(|| position_not_found(ticket))?;
        book.positions.remove(&ticket);
        book.balance += marked.profit;

        Ok(CloseReceipt {
            ticket,
            price: marked.current_price,
            profit: marked.profit,
        })
    }

    pub(crate) async fn modify(
        &self,
        login: &str,
        ticket: Ticket,
        stop_loss: Option<Decimal>,
        take_profit: Option<Decimal>,
    ) -> Result<(), BrokerError> {
        let mut books = self.books.lock().await;
        let position = books
            .get_mut(login)
            .and_then(|b| b.positions.get_mut(&ticket))
            .ok_or_else(|| position_not_found(ticket))?;

        if stop_loss.is_some() {
            position.stop_loss = stop_loss;
        }
        if take_profit.is_some() {
            position.take_profit = take_profit;
        }
        Ok(())
    }
}

fn position_not_found(ticket: Ticket) -> BrokerError {
    BrokerError::Rejected {
        code: 10036,
        message: format!("position {ticket} not found"),
    }
}
