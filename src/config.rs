//! Router configuration
//!
//! An immutable value built at startup and passed by reference into the
//! classifier. Hot reload is an atomic swap of the whole `Arc<RouterConfig>`,
//! never field-level mutation.

use std::time::Duration;

/// Static definition of one intent category
#[derive(Debug, Clone)]
pub struct IntentCategory {
    pub name: String,
    /// Substring-matched against the lowercased query
    pub keywords: Vec<String>,
    /// Case-insensitive regexes; malformed entries are skipped at compile time
    pub patterns: Vec<String>,
    /// Weight applied to both keyword and pattern scores
    pub priority: f32,
    pub needs_realtime_data: bool,
    pub needs_knowledge_base: bool,
    pub needs_historical_context: bool,
    pub is_simple_time_query: bool,
    /// Whether extracted entities boost this category's combined score
    pub entity_sensitive: bool,
    /// Default index symbols when extraction found none
    pub target_indices: Vec<String>,
    /// Default indicator names when extraction found none
    pub economic_indicators: Vec<String>,
}

impl IntentCategory {
    fn new(name: &str, priority: f32) -> Self {
        Self {
            name: name.to_string(),
            keywords: Vec::new(),
            patterns: Vec::new(),
            priority,
            needs_realtime_data: false,
            needs_knowledge_base: true,
            needs_historical_context: false,
            is_simple_time_query: false,
            entity_sensitive: false,
            target_indices: Vec::new(),
            economic_indicators: Vec::new(),
        }
    }

    fn keywords(mut self, keywords: &[&str]) -> Self {
        self.keywords = keywords.iter().map(|s| s.to_string()).collect();
        self
    }

    fn patterns(mut self, patterns: &[&str]) -> Self {
        self.patterns = patterns.iter().map(|s| s.to_string()).collect();
        self
    }
}

/// One recognizable pronoun surface form
#[derive(Debug, Clone)]
pub struct Pronoun {
    /// Literal text detected in queries, e.g. `its`
    pub surface: String,
    /// Form bindings are stored under, e.g. `it`
    pub base: String,
    /// Substituted as `value + "'s"` when rewriting the query
    pub possessive: bool,
}

impl Pronoun {
    fn new(surface: &str, base: &str, possessive: bool) -> Self {
        Self {
            surface: surface.to_string(),
            base: base.to_string(),
            possessive,
        }
    }
}

/// Complete router configuration
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub categories: Vec<IntentCategory>,
    pub pronouns: Vec<Pronoun>,
    /// Winning intent must exceed this combined score
    pub score_threshold: f32,
    pub keyword_weight: f32,
    pub pattern_weight: f32,
    /// Combined-score boost per extracted entity for entity-sensitive intents
    pub entity_boost_step: f32,
    pub entity_boost_cap: f32,
    /// Pronoun written back for entities extracted without one
    pub default_pronoun: String,
    /// Upper bound on stored conversation rounds per user
    pub max_history_rounds: usize,
    /// Deadline for one external classifier consultation
    pub classifier_deadline: Duration,
}

impl RouterConfig {
    pub fn category(&self, name: &str) -> Option<&IntentCategory> {
        self.categories.iter().find(|c| c.name == name)
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            categories: default_categories(),
            pronouns: default_pronouns(),
            score_threshold: 0.3,
            keyword_weight: 0.6,
            pattern_weight: 0.4,
            entity_boost_step: 0.1,
            entity_boost_cap: 0.3,
            default_pronoun: "it".to_string(),
            max_history_rounds: 5,
            classifier_deadline: Duration::from_secs(8),
        }
    }
}

fn default_pronouns() -> Vec<Pronoun> {
    vec![
        Pronoun::new("it", "it", false),
        Pronoun::new("its", "it", true),
        Pronoun::new("this", "this", false),
        Pronoun::new("that", "that", false),
        Pronoun::new("they", "they", false),
        Pronoun::new("them", "they", false),
        Pronoun::new("their", "they", true),
    ]
}

fn default_categories() -> Vec<IntentCategory> {
    let mut market_news = IntentCategory::new("market_news", 0.9)
        .keywords(&[
            "news",
            "headline",
            "headlines",
            "announcement",
            "press release",
            "bulletin",
            "breaking",
        ])
        .patterns(&[
            r"today.*financ.*news",
            r"latest.*market.*(news|update)",
            r"what.*news",
            r"market.*headlines",
        ]);
    market_news.needs_realtime_data = true;

    let mut stock_market = IntentCategory::new("stock_market", 0.8)
        .keywords(&[
            "market",
            "markets",
            "index",
            "indices",
            "benchmark",
            "rally",
            "selloff",
            "composite",
        ])
        .patterns(&[
            r"how.*(is|are).*market",
            r"market.*(doing|today|performance)",
            r"(how|what).*(index|composite|benchmark)",
            r"index.*(performance|level)",
            r"(up|down).*today",
        ]);
    stock_market.needs_realtime_data = true;
    stock_market.entity_sensitive = true;
    stock_market.target_indices = vec![
        "000001.SS".to_string(),
        "399001.SZ".to_string(),
        "399006.SZ".to_string(),
    ];

    let mut specific_stock = IntentCategory::new("specific_stock", 0.7)
        .keywords(&[
            "stock",
            "share",
            "shares",
            "price",
            "quote",
            "ticker",
            "valuation",
        ])
        .patterns(&[
            r"price of \w+",
            r"what.*price",
            r"how much.*(is|are|cost)",
            r"\w+ (stock|share)s?\b",
            r"code \d{6}",
        ]);
    specific_stock.needs_realtime_data = true;
    specific_stock.entity_sensitive = true;

    let mut stock_historical = IntentCategory::new("stock_historical_data", 0.8)
        .keywords(&[
            "history",
            "historical",
            "candlestick",
            "k-line",
            "kline",
            "chart",
            "past performance",
            "trend",
        ])
        .patterns(&[
            r"\w+.*(historical|history).*(data|price|chart)",
            r"\w+.*(daily|weekly).*(candle|bar)",
            r"\w+.*past.*(performance|year|month)",
            r"\w+.*(price chart|trend chart)",
        ]);
    stock_historical.needs_realtime_data = true;
    stock_historical.needs_historical_context = true;
    stock_historical.entity_sensitive = true;

    let mut economic = IntentCategory::new("economic_analysis", 0.6)
        .keywords(&[
            "gdp",
            "cpi",
            "ppi",
            "inflation",
            "economy",
            "economic",
            "interest rate",
            "monetary policy",
            "macro",
        ])
        .patterns(&[
            r"econom.*(data|outlook|indicator)",
            r"gdp.*growth",
            r"cpi.*(rate|change|reading)",
            r"inflation.*(rate|trend)",
            r"interest rate.*(policy|decision)",
        ]);
    economic.needs_realtime_data = true;
    economic.economic_indicators = vec![
        "GDP".to_string(),
        "CPI".to_string(),
        "PPI".to_string(),
    ];

    let mut advice = IntentCategory::new("investment_advice", 0.5)
        .keywords(&[
            "advice",
            "recommend",
            "recommendation",
            "invest",
            "allocation",
            "strategy",
            "portfolio",
        ])
        .patterns(&[
            r"investment.*advice",
            r"(should|can) i buy",
            r"how.*(allocate|diversify)",
            r"(trading|investment).*strategy",
            r"recommend.*(stock|share|fund)",
        ]);
    advice.needs_historical_context = true;

    let mut time_query = IntentCategory::new("time_query", 0.3)
        .keywords(&["today", "now", "date", "time", "weekday"])
        .patterns(&[
            r"what.*date.*today",
            r"what time.*(is it|now)",
            r"(which|what).*day.*week",
            r"today'?s date",
        ]);
    time_query.is_simple_time_query = true;

    vec![
        market_news,
        stock_market,
        specific_stock,
        stock_historical,
        economic,
        advice,
        time_query,
    ]
}
