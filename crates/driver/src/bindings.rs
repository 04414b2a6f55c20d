use ethers::prelude::abigen;

// Generates the bindings for the `Rollup` assertion registry contract.
abigen!(
    IRollup,
    r"[
        event AssertionCreated(uint256 assertionId, address asserterAddr, bytes32 vmHash, uint256 inboxSize)
        event AssertionConfirmed(uint256 assertionId)
        event AssertionChallenged(uint256 assertionId, address challengeAddr)
        function assertions() external view returns (address)
        function lastResolvedAssertionID() external view returns (uint256)
        function lastCreatedAssertionID() external view returns (uint256)
        function isStaked(address addr) external view returns (bool)
        function stakers(address addr) external view returns (bool, uint256, uint256, address)
        function stake() external payable
        function confirmFirstUnresolvedAssertion() external
    ]"
);

// Generates the bindings for the `AssertionMap` contract.
abigen!(
    AssertionMap,
    r"[
        function assertions(uint256 assertionId) external view returns (bytes32, uint256, uint256, uint256, uint256)
    ]"
);

// Generates the bindings for the `Challenge` contract.
abigen!(
    IChallenge,
    r"[
        event Bisected(bytes32 startState, bytes32 midState, bytes32 endState, uint256 blockNum, uint256 blockTime, uint256 challengedSegmentStart, uint256 challengedSegmentLength)
        event ChallengeCompleted(address winner, address loser, uint8 reason)
        function currentResponder() external view returns (address)
        function currentResponderTimeLeft() external view returns (uint256)
        function initializeChallengeLength(bytes32 checkStateHash, uint256 numSteps) external
        function bisectExecution(bytes32[3] bisection, uint256 challengedSegmentStart, uint256 challengedSegmentLength) external
        function verifyOneStepProof(bytes proof, uint256 challengedStepIndex) external
        function timeout() external
    ]"
);
