pub mod broadcast;
pub mod evm;
pub mod evm_tx;
#[cfg(test)]
pub mod testkit;
