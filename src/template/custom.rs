//! Trading configs built from a handful of settings instead of a template

use super::composer::{ConfigArtifact, ConfigOverrides, ConfigTemplate, TemplateComposer};
use crate::error::{FleetError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Most pairs FreqAI correlates against in a generated config
const MAX_CORR_PAIRS: usize = 10;

/// Settings for a config without a template
///
/// Every field has a default, so `{}` decodes to a spot dry-run bot on
/// Binance trading 5m candles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomSettings {
    /// `spot` or `futures`
    pub trading_mode: String,
    pub max_open_trades: u32,
    pub stake_currency: String,
    pub stake_amount: f64,
    pub dry_run: bool,
    pub timeframe: String,
    pub exchange: String,
    /// Minutes before an unfilled entry is cancelled
    pub entry_timeout: u32,
    /// Minutes before an unfilled exit is cancelled
    pub exit_timeout: u32,
    /// Stoploss in percent, e.g. `-10`
    pub stoploss: Option<f64>,
    /// Minimal ROI in percent
    pub minimal_roi: Option<f64>,
    pub freqai: Option<FreqaiSettings>,
}

impl Default for CustomSettings {
    fn default() -> Self {
        Self {
            trading_mode: "spot".to_string(),
            max_open_trades: 5,
            stake_currency: "USDT".to_string(),
            stake_amount: 200.0,
            dry_run: true,
            timeframe: "5m".to_string(),
            exchange: "binance".to_string(),
            entry_timeout: 10,
            exit_timeout: 30,
            stoploss: None,
            minimal_roi: None,
            freqai: None,
        }
    }
}

/// FreqAI training windows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FreqaiSettings {
    pub train_period_days: u32,
    pub backtest_period_days: u32,
    pub live_retrain_hours: u32,
    /// `LightGBM` or `CatBoost`
    pub model_type: String,
}

impl Default for FreqaiSettings {
    fn default() -> Self {
        Self {
            train_period_days: 30,
            backtest_period_days: 7,
            live_retrain_hours: 24,
            model_type: "LightGBM".to_string(),
        }
    }
}

impl CustomSettings {
    /// Decode settings from JSON; unknown keys are ignored
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| FleetError::InvalidTemplate(format!("custom settings: {}", e)))
    }

    /// Base config these settings describe
    pub fn to_template(&self) -> Result<ConfigTemplate> {
        let mut config = json!({
            "$schema": "https://schema.freqtrade.io/schema.json",
            "trading_mode": self.trading_mode,
            "max_open_trades": self.max_open_trades,
            "stake_currency": self.stake_currency,
            "stake_amount": self.stake_amount,
            "tradable_balance_ratio": 0.99,
            "fiat_display_currency": "USD",
            "dry_run": self.dry_run,
            "timeframe": self.timeframe,
            "dry_run_wallet": 1000,
            "cancel_open_orders_on_exit": true,
            "unfilledtimeout": {
                "entry": self.entry_timeout,
                "exit": self.exit_timeout,
            },
            "exchange": {
                "name": self.exchange,
                "key": "",
                "secret": "",
                "ccxt_config": {},
                "ccxt_async_config": {},
                "pair_whitelist": [],
                "pair_blacklist": [],
            },
            "entry_pricing": {
                "price_side": "same",
                "use_order_book": true,
                "order_book_top": 1,
                "price_last_balance": 0.0,
                "check_depth_of_market": { "enabled": false, "bids_to_ask_delta": 1 },
            },
            "exit_pricing": {
                "price_side": "same",
                "use_order_book": true,
                "order_book_top": 1,
            },
            "pairlists": [{ "method": "StaticPairList" }],
            "protections": [
                { "method": "CooldownPeriod", "stop_duration_candles": 5 },
                {
                    "method": "MaxDrawdown",
                    "lookback_period_candles": 24,
                    "trade_limit": 20,
                    "stop_duration_candles": 4,
                    "max_allowed_drawdown": 0.2,
                },
                {
                    "method": "StoplossGuard",
                    "lookback_period_candles": 24,
                    "trade_limit": 4,
                    "stop_duration_candles": 2,
                    "only_per_pair": false,
                },
                {
                    "method": "LowProfitPairs",
                    "lookback_period_candles": 6,
                    "trade_limit": 2,
                    "stop_duration_candles": 60,
                    "required_profit": 0.02,
                },
            ],
            "api_server": {
                "enabled": true,
                "listen_ip_address": "0.0.0.0",
                "listen_port": 8080,
                "verbosity": "error",
                "enable_openapi": true,
                "CORS_origins": ["*"],
            },
            "strategy_path": "user_data/strategies/",
            "initial_state": "running",
            "force_entry_enable": false,
            "internals": { "process_throttle_secs": 5 },
        });

        if self.trading_mode == "futures" {
            config["margin_mode"] = json!("isolated");
        }
        if let Some(stoploss) = self.stoploss {
            config["stoploss"] = json!(stoploss / 100.0);
        }
        if let Some(roi) = self.minimal_roi {
            config["minimal_roi"] = json!({ "0": roi / 100.0 });
        }
        if let Some(freqai) = &self.freqai {
            config["freqai"] = freqai.to_value();
        }

        ConfigTemplate::from_value("custom", config)
    }
}

impl FreqaiSettings {
    fn to_value(&self) -> Value {
        let mut training = json!({
            "n_estimators": 800,
            "learning_rate": 0.02,
            "task_type": "CPU",
        });
        if self.model_type == "CatBoost" {
            training["thread_count"] = json!(-1);
        }
        json!({
            "enabled": true,
            "purge_old_models": 2,
            "train_period_days": self.train_period_days,
            "backtest_period_days": self.backtest_period_days,
            "live_retrain_hours": self.live_retrain_hours,
            "expiration_hours": 1,
            "feature_parameters": {
                "include_timeframes": ["5m", "15m", "4h"],
                "include_corr_pairlist": [],
                "label_period_candles": 24,
                "include_shifted_candles": 2,
                "DI_threshold": 0.9,
                "weight_factor": 0.9,
                "principal_component_analysis": false,
                "use_SVM_to_remove_outliers": true,
                "svm_params": { "shuffle": true, "nu": 0.1 },
                "use_DBSCAN_to_remove_outliers": false,
                "indicator_max_period_candles": 20,
                "indicator_periods_candles": [10, 20],
            },
            "data_split_parameters": { "test_size": 0.33, "shuffle": false },
            "model_training_parameters": training,
        })
    }
}

impl TemplateComposer {
    /// Build a config from `settings`, then apply `overrides`
    ///
    /// A generated config trades a static pairlist, so `overrides` must carry one.
    pub fn compose_custom(
        &self,
        settings: &CustomSettings,
        overrides: &ConfigOverrides,
    ) -> Result<ConfigArtifact> {
        if overrides.pairlist.is_none() {
            return Err(FleetError::MissingRequiredField("pair_whitelist".to_string()));
        }
        let mut artifact = self.compose(&settings.to_template()?, overrides)?;

        if let Some(Value::Array(pairs)) = artifact
            .value_mut()
            .pointer_mut("/freqai/feature_parameters/include_corr_pairlist")
        {
            pairs.truncate(MAX_CORR_PAIRS);
        }
        if let Some(identifier) = &overrides.identifier {
            artifact.value_mut()["db_url"] =
                Value::from(format!("sqlite:///tradesv3_{}.sqlite", identifier));
        }
        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::Pairlist;

    fn pairlist(count: usize) -> Pairlist {
        let pairs: Vec<String> = (0..count).map(|i| format!("COIN{}/USDT", i)).collect();
        Pairlist::parse(&json!({ "pair_whitelist": pairs }).to_string()).unwrap()
    }

    fn overrides(count: usize) -> ConfigOverrides {
        ConfigOverrides::default()
            .strategy("GodStra")
            .pairlist(pairlist(count))
            .identifier("bot1")
            .api_port(8080)
    }

    #[test]
    fn test_defaults_from_empty_object() {
        let settings = CustomSettings::from_json("{\"unknown\": 1}").unwrap();
        assert_eq!(settings, CustomSettings::default());

        let artifact = TemplateComposer::default()
            .compose_custom(&settings, &overrides(3))
            .unwrap();
        let config = artifact.value();
        assert_eq!(config["trading_mode"], "spot");
        assert_eq!(config["timeframe"], "5m");
        assert_eq!(config["exchange"]["name"], "binance");
        assert_eq!(config["exchange"]["pair_whitelist"][2], "COIN2/USDT");
        assert_eq!(config["pairlists"][0]["method"], "StaticPairList");
        assert_eq!(config["strategy"], "GodStra");
        assert_eq!(config["bot_name"], "bot1");
        assert_eq!(config["db_url"], "sqlite:///tradesv3_bot1.sqlite");
        assert!(config["api_server"]["jwt_secret_key"].is_string());
        assert!(config.get("margin_mode").is_none());
        assert!(config.get("freqai").is_none());
    }

    #[test]
    fn test_futures_stoploss_and_roi() {
        let settings = CustomSettings {
            trading_mode: "futures".into(),
            stoploss: Some(-10.0),
            minimal_roi: Some(5.0),
            ..CustomSettings::default()
        };
        let artifact = TemplateComposer::default()
            .compose_custom(&settings, &overrides(1))
            .unwrap();
        let config = artifact.value();
        assert_eq!(config["margin_mode"], "isolated");
        assert_eq!(config["stoploss"], -0.1);
        assert_eq!(config["minimal_roi"]["0"], 0.05);
    }

    #[test]
    fn test_freqai_correlates_first_pairs() {
        let settings = CustomSettings {
            freqai: Some(FreqaiSettings {
                model_type: "CatBoost".into(),
                ..FreqaiSettings::default()
            }),
            ..CustomSettings::default()
        };
        let artifact = TemplateComposer::default()
            .compose_custom(&settings, &overrides(15))
            .unwrap();
        let freqai = &artifact.value()["freqai"];
        assert_eq!(freqai["identifier"], "freqai_bot1");
        assert_eq!(
            freqai["feature_parameters"]["include_corr_pairlist"]
                .as_array()
                .unwrap()
                .len(),
            10
        );
        assert_eq!(freqai["model_training_parameters"]["thread_count"], -1);
        assert_eq!(artifact.value()["exchange"]["pair_whitelist"].as_array().unwrap().len(), 15);
    }

    #[test]
    fn test_pairlist_required() {
        let result = TemplateComposer::default()
            .compose_custom(&CustomSettings::default(), &ConfigOverrides::default());
        assert!(matches!(result, Err(FleetError::MissingRequiredField(_))));
    }
}
