pub mod liquidity;
