//! Solidity event definitions for the watched contracts.

use alloy::sol;

sol! {
    /// ERC-20 token transfer.
    #[derive(Debug, PartialEq, Eq)]
    event Transfer(address indexed from, address indexed to, uint256 value);

    /// Tokens locked into the staking contract.
    #[derive(Debug, PartialEq, Eq)]
    event Deposit(
        address indexed user,
        uint256 indexed lockId,
        uint256 amount,
        uint256 currentBalance,
        uint256 timestamp,
        uint256 lockDuration
    );

    /// Tokens withdrawn from the staking contract.
    #[derive(Debug, PartialEq, Eq)]
    event Withdraw(
        address indexed user,
        uint256 indexed lockId,
        uint256 amount,
        uint256 currentBalance,
        uint256 timestamp
    );

    /// Membership plan purchase. `duration` is 0 for one year, 1 for three.
    #[derive(Debug, PartialEq, Eq)]
    event MembershipPurchased(
        address indexed user,
        uint64 indexed orderId,
        uint256 amount,
        uint8 duration
    );
}
