#![allow(dead_code)]

use lemma_perp_wrapper::math::WAD;
use lemma_perp_wrapper::{
    Address, CollateralToken, Configuration, Direction, LemmaWrapper, MockToken, MockVenue,
};

pub const ONE: i128 = WAD as i128;

pub struct Setup {
    pub wrapper: LemmaWrapper<MockVenue, MockToken>,
    pub venue: MockVenue,
    pub collateral: MockToken,
    pub owner: Address,
    pub minter: Address,
    pub rebalancer: Address,
}

impl Setup {
    pub fn new(decimals: u8, fee_ppm: u128, max_position: u128) -> Self {
        Self::with_side(decimals, fee_ppm, max_position, Direction::Short)
    }

    pub fn with_side(decimals: u8, fee_ppm: u128, max_position: u128, side: Direction) -> Self {
        let venue = MockVenue::new("0xvenue").with_fee_ppm(fee_ppm);
        let collateral = MockToken::new("0xcollateral", decimals);
        let owner = Address::new("0xowner");
        let minter = Address::new("0xusdlemma");
        let rebalancer = Address::new("0xrebalancer");
        let config = Configuration::new(owner.clone(), minter.clone(), rebalancer.clone(), side, max_position);
        let wrapper = LemmaWrapper::new(Address::new("0xwrapper"), config, venue.clone(), collateral.clone())
            .expect("wrapper");
        Self {
            wrapper,
            venue,
            collateral,
            owner,
            minter,
            rebalancer,
        }
    }

    /// Minter sends `amount` native collateral to the wrapper
    pub fn fund(&self, amount: u128) {
        self.collateral.mint(&self.minter, amount);
        self.collateral
            .clone()
            .transfer(&self.minter, self.wrapper.address(), amount)
            .expect("fund wrapper");
    }

    pub fn wrapper_balance(&self) -> u128 {
        self.collateral.balance_of(self.wrapper.address())
    }
}
