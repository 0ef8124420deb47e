pub mod hyperliquid;
