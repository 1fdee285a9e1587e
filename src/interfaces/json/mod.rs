pub mod portfolio_reader;
