pub mod binance_coinm;
