use embedded_hal::i2c::{Error, ErrorKind, ErrorType, I2c, Operation, SevenBitAddress};

#[derive(Debug, PartialEq, Eq)]
pub enum FakeI2cError {
    Transaction,
}

impl Error for FakeI2cError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

/// Recording I2C double. `N` bounds the captured write bytes, `M` the
/// canned read bytes. One target address is recorded per transaction, so
/// tests can tell per-tile traffic from broadcast traffic.
pub struct FakeI2cBus<const N: usize, const M: usize> {
    pub write_data: heapless::Vec<u8, N>,
    pub read_data: heapless::Vec<u8, M>,
    pub addresses: heapless::Vec<u8, 64>,
    failures_left: usize,
}

impl<const N: usize, const M: usize> FakeI2cBus<N, M> {
    pub fn new() -> Self {
        Self {
            write_data: heapless::Vec::new(),
            read_data: heapless::Vec::new(),
            addresses: heapless::Vec::new(),
            failures_left: 0,
        }
    }

    pub fn new_with_read_data(read_data: &[u8]) -> Self {
        Self {
            read_data: heapless::Vec::from_slice(read_data).unwrap(),
            ..Self::new()
        }
    }

    /// Make the next `count` transactions fail without recording anything.
    pub fn fail_next(&mut self, count: usize) {
        self.failures_left = count;
    }

    pub fn write_data_as_ref(&self) -> &[u8] {
        self.write_data.as_slice()
    }

    pub fn addresses_as_ref(&self) -> &[u8] {
        self.addresses.as_slice()
    }
}

impl<const N: usize, const M: usize> ErrorType for FakeI2cBus<N, M> {
    type Error = FakeI2cError;
}

impl<const N: usize, const M: usize> I2c for FakeI2cBus<N, M> {
    fn transaction(
        &mut self,
        address: SevenBitAddress,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        if self.failures_left > 0 {
            self.failures_left -= 1;
            return Err(FakeI2cError::Transaction);
        }

        self.addresses
            .push(address)
            .map_err(|_| FakeI2cError::Transaction)?;

        for operation in operations {
            match operation {
                Operation::Write(write) => {
                    self.write_data
                        .extend_from_slice(write)
                        .map_err(|_| FakeI2cError::Transaction)?;
                }
                Operation::Read(read) => {
                    for byte in read.iter_mut() {
                        // Served strictly in the order they were queued.
                        *byte = self.read_data.remove(0);
                    }
                }
            }
        }
        Ok(())
    }
}
